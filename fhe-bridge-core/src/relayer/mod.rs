//! HTTP client for a relayer fronting the FHE coprocessor.
//!
//! Input plaintexts are sealed to the relayer's X25519 key before they leave the process.
//! User decryption shares come back sealed to the requester's ephemeral key and are opened
//! locally, so neither plaintext ever travels in the clear.

pub mod types;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use ethers::types::{transaction::eip712::TypedData, Address, U256};
use fhe_bridge_utils::{constants::WORD_SIZE, encoding::u128_to_word, seal, SealedBox};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;
use x25519_dalek::PublicKey;

use crate::{
    authorization::{build_user_decrypt_typed_data, EXTRA_DATA},
    config::FheBridgeConfig,
    coprocessor::{
        Coprocessor, CoprocessorError, CoprocessorFactory, InputProofRequest, UserDecryptRequest,
    },
    keypair::{parse_public_key, EphemeralKeypair},
    normalize::{RawEncryptionResult, RawPublicDecryption},
    types::{CiphertextHandle, ClearValue},
};
use types::{
    Envelope, ErrorBody, InputProofBody, KeyUrlResponse, PublicDecryptBody, RequestValidity,
    SealedPayload, UserDecryptBody, UserDecryptShare,
};

const KEY_URL_PATH: &str = "v1/keyurl";
const INPUT_PROOF_PATH: &str = "v1/input-proof";
const USER_DECRYPT_PATH: &str = "v1/user-decrypt";
const PUBLIC_DECRYPT_PATH: &str = "v1/public-decrypt";

/// Client for the relayer HTTP API
pub struct RelayerClient {
    client: Client,
    base_url: String,
    config: FheBridgeConfig,
    chain_id: u64,
    relayer_public_key: PublicKey,
    key_id: String,
}

impl RelayerClient {
    /// Connects to the relayer configured in `config` and fetches its public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the relayer url is invalid, the relayer cannot be reached, or it
    /// does not return a usable key.
    #[instrument(level = "info", skip_all, fields(relayer_url = config.relayer_url()))]
    pub async fn connect(config: &FheBridgeConfig, chain_id: u64) -> Result<Self, CoprocessorError> {
        let base_url = Url::parse(config.relayer_url())
            .map_err(|e| CoprocessorError::InvalidConfig(format!("relayer url: {e}")))?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CoprocessorError::InvalidConfig(e.to_string()))?;
        let base_url = base_url.as_str().trim_end_matches('/').to_string();

        let response = client
            .get(format!("{base_url}/{KEY_URL_PATH}"))
            .send()
            .await?;
        let key: KeyUrlResponse = read_response(response).await?;
        let relayer_public_key = parse_public_key(&key.public_key)?;
        info!(
            target = "fhe-bridge-relayer",
            event = "relayer_connected",
            key_id = %key.key_id,
            chain_id,
            "Fetched relayer public key"
        );
        Ok(Self {
            client,
            base_url,
            config: config.clone(),
            chain_id,
            relayer_public_key,
            key_id: key.key_id,
        })
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CoprocessorError> {
        debug!(
            target = "fhe-bridge-relayer",
            event = "relayer_request",
            path,
            "Sending relayer request"
        );
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        read_response(response).await
    }
}

/// Unwraps a relayer reply, classifying failed statuses.
async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, CoprocessorError> {
    let status = response.status();
    if status.is_success() {
        let envelope: Envelope<T> = response.json().await?;
        return Ok(envelope.response);
    }
    let message = failure_message(response.text().await);
    warn!(
        target = "fhe-bridge-relayer",
        event = "relayer_request_failed",
        status = status.as_u16(),
        message = %message,
        "Relayer request failed"
    );
    Err(classify_status(status, message))
}

/// The relayer's error message, the raw body when it is not JSON, or the read failure.
fn failure_message<E: std::fmt::Display>(body: Result<String, E>) -> String {
    match body {
        Ok(body) => serde_json::from_str::<ErrorBody>(&body)
            .map(|error| error.message)
            .unwrap_or(body),
        Err(e) => format!("failed to read error body: {e}"),
    }
}

fn classify_status(status: StatusCode, message: String) -> CoprocessorError {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            CoprocessorError::Network(format!("relayer returned {status}: {message}"))
        }
        _ => CoprocessorError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

fn open_share(keypair: &EphemeralKeypair, payload: &SealedPayload) -> Result<ClearValue, CoprocessorError> {
    let sealed = SealedBox::try_from(payload).map_err(CoprocessorError::MalformedResponse)?;
    let word = keypair.open(&sealed)?;
    if word.len() != WORD_SIZE {
        return Err(CoprocessorError::MalformedResponse(format!(
            "decrypted share is {} bytes, expected {WORD_SIZE}",
            word.len()
        )));
    }
    Ok(ClearValue::Word(U256::from_big_endian(&word)))
}

#[async_trait]
impl Coprocessor for RelayerClient {
    fn generate_keypair(&self) -> EphemeralKeypair {
        EphemeralKeypair::generate()
    }

    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[Address],
        start_timestamp: u64,
        duration_days: u64,
    ) -> Result<TypedData, CoprocessorError> {
        build_user_decrypt_typed_data(
            &self.config,
            public_key,
            contract_addresses,
            start_timestamp,
            duration_days,
        )
        .map_err(|e| CoprocessorError::Other(format!("invalid typed data: {e}")))
    }

    #[instrument(level = "debug", skip_all, fields(values = request.values.len()))]
    async fn encrypt_input(
        &self,
        request: InputProofRequest,
    ) -> Result<RawEncryptionResult, CoprocessorError> {
        let plaintext = request
            .values
            .iter()
            .flat_map(|(value, _)| u128_to_word(*value))
            .collect::<Vec<u8>>();
        let sealed = seal(&self.relayer_public_key, &plaintext)?;
        let body = InputProofBody {
            contract_address: request.contract_address,
            user_address: request.user_address,
            contract_chain_id: self.chain_id,
            bit_widths: request
                .values
                .iter()
                .map(|(_, width)| width.bits())
                .collect(),
            sealed: SealedPayload::from(&sealed),
            extra_data: EXTRA_DATA.to_string(),
        };
        let response: Value = self.post(INPUT_PROOF_PATH, &body).await?;
        Ok(RawEncryptionResult::from_json(response))
    }

    #[instrument(level = "debug", skip_all, fields(handles = request.handle_contract_pairs.len()))]
    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<CiphertextHandle, ClearValue>, CoprocessorError> {
        let body = UserDecryptBody {
            handle_contract_pairs: request.handle_contract_pairs,
            request_validity: RequestValidity {
                start_timestamp: request.start_timestamp.to_string(),
                duration_days: request.duration_days.to_string(),
            },
            contracts_chain_id: self.chain_id,
            contract_addresses: request.contract_addresses,
            user_address: request.user_address,
            signature: request.signature,
            public_key: request.keypair.public_key_hex(),
            extra_data: EXTRA_DATA.to_string(),
        };
        let shares: Vec<UserDecryptShare> = self.post(USER_DECRYPT_PATH, &body).await?;
        shares
            .iter()
            .map(|share| Ok((share.handle, open_share(&request.keypair, &share.payload)?)))
            .collect()
    }

    #[instrument(level = "debug", skip_all, fields(handles = handles.len()))]
    async fn public_decrypt(
        &self,
        handles: &[CiphertextHandle],
    ) -> Result<RawPublicDecryption, CoprocessorError> {
        let body = PublicDecryptBody {
            ciphertext_handles: handles.to_vec(),
            extra_data: EXTRA_DATA.to_string(),
        };
        self.post(PUBLIC_DECRYPT_PATH, &body).await
    }
}

/// Creates a [`RelayerClient`] per instance
pub struct RelayerFactory;

#[async_trait]
impl CoprocessorFactory for RelayerFactory {
    async fn create(
        &self,
        config: &FheBridgeConfig,
        chain_id: u64,
    ) -> Result<Arc<dyn Coprocessor>, CoprocessorError> {
        Ok(Arc::new(RelayerClient::connect(config, chain_id).await?))
    }
}
