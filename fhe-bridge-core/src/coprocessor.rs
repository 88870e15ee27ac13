use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use ethers::types::{transaction::eip712::TypedData, Address};
use thiserror::Error;

use crate::{
    config::FheBridgeConfig,
    keypair::{EphemeralKeypair, KeypairError},
    normalize::{RawEncryptionResult, RawPublicDecryption},
    types::{BitWidth, CiphertextHandle, ClearValue, HandleContractPair},
};

/// Substrings that mark an error message as a transport failure
const NETWORK_ERROR_MARKERS: [&str; 2] = ["Failed to fetch", "NetworkError"];

/// Values appended to one input-construction session, finalized in a single round-trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputProofRequest {
    pub contract_address: Address,
    pub user_address: Address,
    pub values: Vec<(u128, BitWidth)>,
}

/// Everything the coprocessor needs to serve an authenticated decryption.
///
/// The keypair travels with the request because the client opens the sealed values
/// locally, the private key is never sent over the wire.
#[derive(Clone, Debug)]
pub struct UserDecryptRequest {
    pub handle_contract_pairs: Vec<HandleContractPair>,
    pub keypair: EphemeralKeypair,
    /// Signature over the typed authorization, without its `0x` prefix
    pub signature: String,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    pub start_timestamp: u64,
    pub duration_days: u64,
}

/// The coprocessor client, the external service performing FHE encryption and decryption.
///
/// Implementations are expected to be reentrant: the orchestration layer shares one client
/// across concurrent calls and imposes no call queue of its own.
#[async_trait]
pub trait Coprocessor: Send + Sync {
    /// Generates a fresh ephemeral keypair for authenticated decryption
    fn generate_keypair(&self) -> EphemeralKeypair;

    /// Builds the typed structured-data authorization for a user decryption
    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[Address],
        start_timestamp: u64,
        duration_days: u64,
    ) -> Result<TypedData, CoprocessorError>;

    /// Encrypts the session values and returns the raw, unnormalized result
    async fn encrypt_input(
        &self,
        request: InputProofRequest,
    ) -> Result<RawEncryptionResult, CoprocessorError>;

    /// Exchanges a signed authorization for the plaintexts of the requested handles
    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<CiphertextHandle, ClearValue>, CoprocessorError>;

    /// Decrypts handles previously marked publicly decryptable
    async fn public_decrypt(
        &self,
        handles: &[CiphertextHandle],
    ) -> Result<RawPublicDecryption, CoprocessorError>;
}

/// Creates coprocessor clients for a resolved configuration and chain.
#[async_trait]
pub trait CoprocessorFactory: Send + Sync {
    async fn create(
        &self,
        config: &FheBridgeConfig,
        chain_id: u64,
    ) -> Result<Arc<dyn Coprocessor>, CoprocessorError>;
}

#[derive(Debug, Error)]
pub enum CoprocessorError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request rejected by the coprocessor (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Malformed coprocessor response: {0}")]
    MalformedResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Key error: {0}")]
    Keypair(#[from] KeypairError),
    #[error("Sealing error: {0}")]
    Sealing(#[from] fhe_bridge_utils::encryption::Error),
    #[error("{0}")]
    Other(String),
}

impl CoprocessorError {
    /// Whether this is a transport-level failure the caller may retry
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Rejected { message, .. } | Self::Other(message) => is_network_message(message),
            _ => false,
        }
    }
}

fn is_network_message(message: &str) -> bool {
    NETWORK_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

impl From<reqwest::Error> for CoprocessorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::MalformedResponse(error.to_string())
        } else if error.is_connect()
            || error.is_timeout()
            || error.is_request()
            || error.is_body()
        {
            Self::Network(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Rejected {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            Self::Other(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(CoprocessorError::Network("reset".to_string()).is_network());
        assert!(CoprocessorError::Other("TypeError: Failed to fetch".to_string()).is_network());
        assert!(CoprocessorError::Rejected {
            status: 500,
            message: "upstream NetworkError when attempting to fetch resource".to_string(),
        }
        .is_network());
        assert!(!CoprocessorError::Rejected {
            status: 400,
            message: "invalid signature".to_string(),
        }
        .is_network());
        assert!(!CoprocessorError::MalformedResponse("Failed to fetch".to_string()).is_network());
    }
}
