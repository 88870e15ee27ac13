use std::{path::Path, time::Duration};

use config::Config as RustConfig;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Section of the configuration file holding the coprocessor settings
pub const CONFIG_SECTION: &str = "fhe_bridge";

/// Prefix of the environment variables overriding the configuration file
pub const ENV_PREFIX: &str = "FHE_BRIDGE";

/// Configuration handed to the coprocessor client.
///
/// Contract addresses are those of the FHE protocol deployment on the host chain, the
/// gateway chain id and the decryption verifying contract are used for the typed
/// authorization domain.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FheBridgeConfig {
    /// Chain id of the host chain holding the ciphertext handles
    chain_id: u64,

    /// Access control list contract
    acl_contract_address: Address,

    /// Key management contract
    kms_contract_address: Address,

    /// Input verifier contract
    input_verifier_contract_address: Address,

    /// Verifying contract for decryption, the typed authorization domain's `verifyingContract`
    verifying_contract_address_decryption: Address,

    /// Verifying contract for input verification
    verifying_contract_address_input_verification: Address,

    /// Chain id of the gateway chain, the typed authorization domain's `chainId`
    gateway_chain_id: u64,

    /// Base URL of the relayer fronting the coprocessor
    relayer_url: String,

    /// Optional RPC endpoint, used for headless operation
    rpc_url: Option<String>,

    /// Timeout applied to every relayer request, in milliseconds
    request_timeout_ms: Option<u64>,
}

impl FheBridgeConfig {
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    #[must_use]
    pub const fn acl_contract_address(&self) -> Address {
        self.acl_contract_address
    }

    #[must_use]
    pub const fn kms_contract_address(&self) -> Address {
        self.kms_contract_address
    }

    #[must_use]
    pub const fn input_verifier_contract_address(&self) -> Address {
        self.input_verifier_contract_address
    }

    #[must_use]
    pub const fn verifying_contract_address_decryption(&self) -> Address {
        self.verifying_contract_address_decryption
    }

    #[must_use]
    pub const fn verifying_contract_address_input_verification(&self) -> Address {
        self.verifying_contract_address_input_verification
    }

    #[must_use]
    pub const fn gateway_chain_id(&self) -> u64 {
        self.gateway_chain_id
    }

    #[must_use]
    pub fn relayer_url(&self) -> &str {
        &self.relayer_url
    }

    #[must_use]
    pub fn rpc_url(&self) -> Option<&str> {
        self.rpc_url.as_deref()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Loads the configuration from a file, with `FHE_BRIDGE__*` environment overrides.
    ///
    /// The file may be in any format supported by the `config` crate and must contain a
    /// `fhe_bridge` section.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if the section is missing,
    /// or if its values do not deserialize.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use fhe_bridge_core::config::FheBridgeConfig;
    ///
    /// let config = FheBridgeConfig::from_file_path("config.toml")?;
    /// ```
    pub fn from_file_path<P: AsRef<Path>>(config_file_path: P) -> Result<Self, ConfigError> {
        let path = config_file_path.as_ref();
        let path = path
            .to_str()
            .ok_or_else(|| ConfigError::InvalidPath(path.display().to_string()))?;
        let config = RustConfig::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .keep_prefix(true)
                    .separator("__"),
            )
            .build()?;
        Ok(config.get::<Self>(CONFIG_SECTION)?)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: `{0}`")]
    Load(#[from] config::ConfigError),
    #[error("Configuration path is not valid UTF-8: `{0}`")]
    InvalidPath(String),
}

/// Builder for [`FheBridgeConfig`].
///
/// Addresses default to the zero address and chain ids to zero, which is mostly useful
/// in tests.
///
/// # Example
///
/// ```rust,ignore
/// let config = Builder::new()
///     .chain_id(11155111)
///     .relayer_url("https://relayer.example.org".to_string())
///     .build();
/// ```
#[derive(Default)]
pub struct Builder {
    chain_id: Option<u64>,
    acl_contract_address: Option<Address>,
    kms_contract_address: Option<Address>,
    input_verifier_contract_address: Option<Address>,
    verifying_contract_address_decryption: Option<Address>,
    verifying_contract_address_input_verification: Option<Address>,
    gateway_chain_id: Option<u64>,
    relayer_url: Option<String>,
    rpc_url: Option<String>,
    request_timeout_ms: Option<u64>,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    #[must_use]
    pub const fn acl_contract_address(mut self, address: Address) -> Self {
        self.acl_contract_address = Some(address);
        self
    }

    #[must_use]
    pub const fn kms_contract_address(mut self, address: Address) -> Self {
        self.kms_contract_address = Some(address);
        self
    }

    #[must_use]
    pub const fn input_verifier_contract_address(mut self, address: Address) -> Self {
        self.input_verifier_contract_address = Some(address);
        self
    }

    #[must_use]
    pub const fn verifying_contract_address_decryption(mut self, address: Address) -> Self {
        self.verifying_contract_address_decryption = Some(address);
        self
    }

    #[must_use]
    pub const fn verifying_contract_address_input_verification(mut self, address: Address) -> Self {
        self.verifying_contract_address_input_verification = Some(address);
        self
    }

    #[must_use]
    pub const fn gateway_chain_id(mut self, chain_id: u64) -> Self {
        self.gateway_chain_id = Some(chain_id);
        self
    }

    #[must_use]
    pub fn relayer_url(mut self, url: String) -> Self {
        self.relayer_url = Some(url);
        self
    }

    #[must_use]
    pub fn rpc_url(mut self, url: String) -> Self {
        self.rpc_url = Some(url);
        self
    }

    #[must_use]
    pub const fn request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn build(self) -> FheBridgeConfig {
        FheBridgeConfig {
            chain_id: self.chain_id.unwrap_or_default(),
            acl_contract_address: self.acl_contract_address.unwrap_or_default(),
            kms_contract_address: self.kms_contract_address.unwrap_or_default(),
            input_verifier_contract_address: self
                .input_verifier_contract_address
                .unwrap_or_default(),
            verifying_contract_address_decryption: self
                .verifying_contract_address_decryption
                .unwrap_or_default(),
            verifying_contract_address_input_verification: self
                .verifying_contract_address_input_verification
                .unwrap_or_default(),
            gateway_chain_id: self.gateway_chain_id.unwrap_or_default(),
            relayer_url: self.relayer_url.unwrap_or_default(),
            rpc_url: self.rpc_url,
            request_timeout_ms: self.request_timeout_ms,
        }
    }
}
