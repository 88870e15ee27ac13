use ethers::types::Address;
use tracing::{error, info, instrument};

use crate::{
    coprocessor::InputProofRequest,
    errors::FheBridgeError,
    instance::FheInstance,
    normalize::{normalize, normalize_batch, RawEncryptionResult},
    progress::Step,
    types::{BitWidth, EncryptedInput, EncryptedInputBatch},
};

/// An input-construction session scoped to one `(contract, user)` pair.
///
/// Values are appended locally and sent to the coprocessor in a single round-trip when the
/// session is finalized, all resulting handles share one proof.
pub struct EncryptedInputSession<'a> {
    instance: &'a FheInstance,
    contract_address: Address,
    user_address: Address,
    values: Vec<(u128, BitWidth)>,
}

impl<'a> EncryptedInputSession<'a> {
    fn new(instance: &'a FheInstance, contract_address: Address, user_address: Address) -> Self {
        instance.progress().report(
            Step::InputSessionOpened,
            format!("contract {contract_address:?}, user {user_address:?}"),
        );
        Self {
            instance,
            contract_address,
            user_address,
            values: Vec::new(),
        }
    }

    /// Appends `value` at `bit_width`.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] if the value does not fit the width.
    pub fn add(&mut self, value: u128, bit_width: BitWidth) -> Result<&mut Self, FheBridgeError> {
        if !bit_width.fits(value) {
            return Err(FheBridgeError::InvalidArgument(format!(
                "value {value} does not fit in {} unsigned bits",
                bit_width.bits()
            )));
        }
        self.values.push((value, bit_width));
        Ok(self)
    }

    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.values.push((u128::from(value), BitWidth::Bool));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sends the session to the coprocessor and returns every handle with the shared proof.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] for an empty session, and
    /// [`FheBridgeError::Encryption`] (or [`FheBridgeError::ServiceUnavailable`]) if the
    /// coprocessor fails.
    pub async fn finalize(self) -> Result<EncryptedInputBatch, FheBridgeError> {
        let raw = self.request().await?;
        normalize_batch(&raw)
    }

    /// Sends a single-value session and returns its handle and proof.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptedInputSession::finalize`].
    pub async fn encrypt(self) -> Result<EncryptedInput, FheBridgeError> {
        let raw = self.request().await?;
        normalize(&raw)
    }

    #[instrument(level = "info", skip_all, fields(contract = ?self.contract_address, values = self.values.len()))]
    async fn request(self) -> Result<RawEncryptionResult, FheBridgeError> {
        if self.values.is_empty() {
            return Err(FheBridgeError::InvalidArgument(
                "input session holds no value".to_string(),
            ));
        }
        let progress = self.instance.progress();
        let count = self.values.len();
        let request = InputProofRequest {
            contract_address: self.contract_address,
            user_address: self.user_address,
            values: self.values,
        };
        let raw = self
            .instance
            .coprocessor()
            .encrypt_input(request)
            .await
            .map_err(|e| {
                error!(
                    target = "fhe-bridge-encrypt",
                    event = "encrypt_input_failed",
                    error = %e,
                    "Coprocessor failed to encrypt input"
                );
                progress.report(Step::Failed, e.to_string());
                FheBridgeError::encryption(Step::InputEncrypted, e)
            })?;
        info!(
            target = "fhe-bridge-encrypt",
            event = "input_encrypted",
            values = count,
            "Input encrypted"
        );
        progress.report(Step::InputEncrypted, format!("{count} value(s)"));
        Ok(raw)
    }
}

impl FheInstance {
    /// Opens an input-construction session for `(contract_address, user_address)`.
    #[must_use]
    pub fn create_encrypted_input(
        &self,
        contract_address: Address,
        user_address: Address,
    ) -> EncryptedInputSession<'_> {
        EncryptedInputSession::new(self, contract_address, user_address)
    }

    /// Encrypts `value` for `(contract_address, user_address)`, at 32 bits unless another
    /// width is given.
    ///
    /// The returned handle and proof are the two leading arguments of the target ledger
    /// method, see [`EncryptedInput::ledger_arguments`].
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] if the value does not fit the width,
    /// [`FheBridgeError::Encryption`] or [`FheBridgeError::ServiceUnavailable`] if the
    /// coprocessor fails, and [`FheBridgeError::UnrecognizedResponseShape`] if its reply
    /// cannot be normalized.
    pub async fn encrypt(
        &self,
        contract_address: Address,
        user_address: Address,
        value: u128,
        bit_width: Option<BitWidth>,
    ) -> Result<EncryptedInput, FheBridgeError> {
        let mut session = self.create_encrypted_input(contract_address, user_address);
        session.add(value, bit_width.unwrap_or_default())?;
        session.encrypt().await
    }
}
