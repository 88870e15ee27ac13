//! Authenticated ("user") decryption.
//!
//! A decryption walks `Idle -> KeypairGenerated -> AuthorizationBuilt -> Signed -> Decrypted`:
//! an ephemeral keypair is generated, a typed authorization binding its public key to the
//! contracts and a validity window is built and signed by the key holder, and the signed
//! authorization is exchanged for the plaintexts, sealed to the ephemeral key. Any step may
//! end in `Failed`.

use std::collections::HashSet;

use ethers::types::Address;
use tracing::{error, info, instrument};

use crate::{
    authorization::{
        strip_hex_prefix, unix_now, validate_validity_days, SignedAuthorization,
        DEFAULT_VALIDITY_DAYS,
    },
    coprocessor::UserDecryptRequest,
    errors::FheBridgeError,
    instance::FheInstance,
    network::KeyHolder,
    progress::{ProgressReporter, Step},
    types::{CiphertextHandle, HandleContractPair, UserDecryptionResult},
};

/// Tracks the protocol state of one decryption and reports every transition.
struct DecryptionFlow<'a> {
    progress: &'a ProgressReporter,
    state: Step,
}

impl<'a> DecryptionFlow<'a> {
    /// Picks the flow up in `state` without reporting it.
    const fn at(progress: &'a ProgressReporter, state: Step) -> Self {
        Self { progress, state }
    }

    fn advance(&mut self, step: Step, detail: impl Into<String>) {
        self.state = step;
        self.progress.report(step, detail);
    }

    /// Moves to `Failed`, reporting the state the failure happened in.
    fn fail(&mut self, error: FheBridgeError) -> FheBridgeError {
        error!(
            target = "fhe-bridge-user-decrypt",
            event = "user_decrypt_failed",
            state = %self.state,
            error = %error,
            "User decryption failed"
        );
        self.progress
            .report(Step::Failed, format!("after {}: {error}", self.state));
        self.state = Step::Failed;
        error
    }
}

fn parse_handle(handle: &str) -> Result<CiphertextHandle, FheBridgeError> {
    handle.parse().map_err(|e: crate::types::HandleParseError| {
        FheBridgeError::decryption_for_handle(Step::Idle, handle, e.to_string())
    })
}

fn unique_contracts(pairs: &[HandleContractPair]) -> Vec<Address> {
    let mut seen = HashSet::new();
    pairs
        .iter()
        .map(|pair| pair.contract_address)
        .filter(|contract| seen.insert(*contract))
        .collect()
}

impl FheInstance {
    /// Decrypts `handles` of `contract_address` on behalf of `key_holder`.
    ///
    /// All handles share one keypair, one authorization and one signature. The authorization
    /// is valid for `validity_days` days from now, 10 by default. The result is keyed by
    /// handle and covers every requested handle.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] for an empty handle list or an invalid
    /// validity window, [`FheBridgeError::Decryption`] for a malformed handle, a refused
    /// signature, a rejected request or a non-numeric value, and
    /// [`FheBridgeError::ServiceUnavailable`] for transport failures.
    pub async fn decrypt_authenticated<H: AsRef<str>>(
        &self,
        contract_address: Address,
        key_holder: &dyn KeyHolder,
        handles: &[H],
        validity_days: Option<u64>,
    ) -> Result<UserDecryptionResult, FheBridgeError> {
        let pairs = handles
            .iter()
            .map(|handle| (handle, contract_address))
            .collect::<Vec<_>>();
        self.decrypt_authenticated_pairs(&pairs, key_holder, validity_days)
            .await
    }

    /// Like [`FheInstance::decrypt_authenticated`], for handles spread over several contracts.
    ///
    /// # Errors
    ///
    /// Same as [`FheInstance::decrypt_authenticated`].
    pub async fn decrypt_authenticated_pairs<H: AsRef<str>>(
        &self,
        pairs: &[(H, Address)],
        key_holder: &dyn KeyHolder,
        validity_days: Option<u64>,
    ) -> Result<UserDecryptionResult, FheBridgeError> {
        let mut flow = DecryptionFlow::at(self.progress(), Step::Idle);
        if pairs.is_empty() {
            return Err(flow.fail(FheBridgeError::InvalidArgument(
                "no ciphertext handle to decrypt".to_string(),
            )));
        }
        let pairs = pairs
            .iter()
            .map(|(handle, contract_address)| {
                Ok(HandleContractPair {
                    handle: parse_handle(handle.as_ref())?,
                    contract_address: *contract_address,
                })
            })
            .collect::<Result<Vec<_>, FheBridgeError>>()
            .map_err(|e| flow.fail(e))?;
        let contracts = unique_contracts(&pairs);
        let authorization = self
            .prepare_user_decryption(&contracts, key_holder, validity_days)
            .await?;
        self.decrypt_with_authorization(&authorization, &pairs).await
    }

    /// Runs the first three steps of the protocol: generates a keypair, builds the
    /// authorization for `contract_addresses` and has `key_holder` sign it.
    ///
    /// The result may be reused with [`FheInstance::decrypt_with_authorization`] until it
    /// expires.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] for an empty contract list or an invalid
    /// validity window, and [`FheBridgeError::Decryption`] if the authorization cannot be
    /// built or signed.
    #[instrument(level = "info", skip_all, fields(contracts = contract_addresses.len()))]
    pub async fn prepare_user_decryption(
        &self,
        contract_addresses: &[Address],
        key_holder: &dyn KeyHolder,
        validity_days: Option<u64>,
    ) -> Result<SignedAuthorization, FheBridgeError> {
        let mut flow = DecryptionFlow::at(self.progress(), Step::Idle);
        if contract_addresses.is_empty() {
            return Err(flow.fail(FheBridgeError::InvalidArgument(
                "authorization must cover at least one contract".to_string(),
            )));
        }
        let duration_days = validity_days.unwrap_or(DEFAULT_VALIDITY_DAYS);
        validate_validity_days(duration_days)
            .map_err(|e| flow.fail(FheBridgeError::InvalidArgument(e)))?;
        flow.advance(
            Step::Idle,
            format!("{} contract(s)", contract_addresses.len()),
        );

        let keypair = self.coprocessor().generate_keypair();
        flow.advance(Step::KeypairGenerated, keypair.public_key_hex());

        let start_timestamp = unix_now();
        let typed_data = self
            .coprocessor()
            .create_eip712(
                &keypair.public_key_hex(),
                contract_addresses,
                start_timestamp,
                duration_days,
            )
            .map_err(|e| flow.fail(FheBridgeError::decryption(Step::AuthorizationBuilt, e)))?;
        flow.advance(
            Step::AuthorizationBuilt,
            format!("valid from {start_timestamp} for {duration_days} day(s)"),
        );

        let signature = key_holder.sign_typed_data(&typed_data).await.map_err(|e| {
            flow.fail(FheBridgeError::Decryption {
                step: Step::Signed,
                handle: None,
                reason: format!("key holder refused to sign the authorization: {e}"),
            })
        })?;
        let signer = key_holder.address();
        flow.advance(Step::Signed, format!("{signer:?}"));
        info!(
            target = "fhe-bridge-user-decrypt",
            event = "authorization_signed",
            signer = ?signer,
            duration_days,
            "User decryption authorization signed"
        );

        Ok(SignedAuthorization::new(
            typed_data,
            strip_hex_prefix(&signature),
            signer,
            keypair,
            contract_addresses.to_vec(),
            start_timestamp,
            duration_days,
        ))
    }

    /// Runs the last step of the protocol for `pairs` with an existing authorization.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] if the pair list is empty, the
    /// authorization expired, or a pair names a contract it does not cover.
    /// [`FheBridgeError::Decryption`] if the coprocessor rejects the request, omits a
    /// requested handle or returns a non-numeric value, and
    /// [`FheBridgeError::ServiceUnavailable`] for transport failures.
    #[instrument(level = "info", skip_all, fields(handles = pairs.len(), signer = ?authorization.signer()))]
    pub async fn decrypt_with_authorization(
        &self,
        authorization: &SignedAuthorization,
        pairs: &[HandleContractPair],
    ) -> Result<UserDecryptionResult, FheBridgeError> {
        let mut flow = DecryptionFlow::at(self.progress(), Step::Signed);
        if pairs.is_empty() {
            return Err(flow.fail(FheBridgeError::InvalidArgument(
                "no ciphertext handle to decrypt".to_string(),
            )));
        }
        if authorization.is_expired(unix_now()) {
            return Err(flow.fail(FheBridgeError::InvalidArgument(format!(
                "authorization expired at {}",
                authorization.expires_at()
            ))));
        }
        if let Some(pair) = pairs
            .iter()
            .find(|pair| !authorization.covers(&pair.contract_address))
        {
            return Err(flow.fail(FheBridgeError::InvalidArgument(format!(
                "authorization does not cover contract {:?} of handle {}",
                pair.contract_address, pair.handle
            ))));
        }

        let request = UserDecryptRequest {
            handle_contract_pairs: pairs.to_vec(),
            keypair: authorization.keypair().clone(),
            signature: authorization.signature().to_string(),
            contract_addresses: authorization.contract_addresses().to_vec(),
            user_address: authorization.signer(),
            start_timestamp: authorization.start_timestamp(),
            duration_days: authorization.duration_days(),
        };
        let clear_values = self
            .coprocessor()
            .user_decrypt(request)
            .await
            .map_err(|e| flow.fail(FheBridgeError::decryption(Step::Decrypted, e)))?;

        let mut result = UserDecryptionResult::with_capacity(pairs.len());
        for pair in pairs {
            let value = clear_values
                .get(&pair.handle)
                .ok_or_else(|| {
                    flow.fail(FheBridgeError::decryption_for_handle(
                        Step::Decrypted,
                        pair.handle,
                        "missing from the coprocessor response",
                    ))
                })?
                .to_u128()
                .ok_or_else(|| {
                    flow.fail(FheBridgeError::decryption_for_handle(
                        Step::Decrypted,
                        pair.handle,
                        "decrypted value is not numeric",
                    ))
                })?;
            result.insert(pair.handle, value);
        }
        flow.advance(Step::Decrypted, format!("{} value(s)", result.len()));
        info!(
            target = "fhe-bridge-user-decrypt",
            event = "user_decrypted",
            values = result.len(),
            "User decryption complete"
        );
        Ok(result)
    }
}
