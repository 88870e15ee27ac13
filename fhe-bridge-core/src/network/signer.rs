use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer, WalletError},
    types::{transaction::eip712::TypedData, Address},
};
use fhe_bridge_utils::encoding::to_prefixed_hex;
use serde_json::{json, Value};
use thiserror::Error;

use super::{Eip1193Provider, NetworkError};

/// Provider method used to sign typed structured data
pub const SIGN_TYPED_DATA_METHOD: &str = "eth_signTypedData_v4";

/// The party controlling an address, able to sign typed structured data for it.
#[async_trait]
pub trait KeyHolder: Send + Sync {
    fn address(&self) -> Address;

    /// Signs `typed_data`, returning the `0x`-prefixed hex signature
    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<String, KeyHolderError>;
}

/// A key holder backed by a locally held private key.
#[derive(Clone, Debug)]
pub struct WalletKeyHolder {
    wallet: LocalWallet,
}

impl WalletKeyHolder {
    #[must_use]
    pub const fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Builds a key holder from a hex private key, with or without `0x`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid secp256k1 secret.
    pub fn from_private_key(private_key: &str) -> Result<Self, KeyHolderError> {
        let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);
        Ok(Self::new(LocalWallet::from_str(private_key)?))
    }

    #[must_use]
    pub const fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

#[async_trait]
impl KeyHolder for WalletKeyHolder {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<String, KeyHolderError> {
        let signature = self.wallet.sign_typed_data(typed_data).await?;
        Ok(to_prefixed_hex(signature.to_vec()))
    }
}

/// A key holder reached through an interactive provider, which signs on the user's behalf.
pub struct ProviderKeyHolder {
    provider: Arc<dyn Eip1193Provider>,
    address: Address,
}

impl ProviderKeyHolder {
    /// Asks the provider for its accounts and binds to the first one.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider exposes no account.
    pub async fn connect(provider: Arc<dyn Eip1193Provider>) -> Result<Self, NetworkError> {
        let accounts = provider.request("eth_requestAccounts", json!([])).await?;
        let address = accounts
            .as_array()
            .and_then(|accounts| accounts.first())
            .and_then(Value::as_str)
            .and_then(|address| Address::from_str(address).ok())
            .ok_or_else(|| {
                NetworkError::InvalidResponse(format!("no usable account in {accounts}"))
            })?;
        Ok(Self { provider, address })
    }
}

#[async_trait]
impl KeyHolder for ProviderKeyHolder {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<String, KeyHolderError> {
        let payload = serde_json::to_string(typed_data)
            .map_err(|e| KeyHolderError::InvalidTypedData(e.to_string()))?;
        let signature = self
            .provider
            .request(SIGN_TYPED_DATA_METHOD, json!([self.address, payload]))
            .await?;
        signature
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| KeyHolderError::InvalidSignature(signature.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum KeyHolderError {
    #[error("Wallet error: `{0}`")]
    Wallet(#[from] WalletError),
    #[error("Provider error: `{0}`")]
    Provider(#[from] NetworkError),
    #[error("Invalid typed data: `{0}`")]
    InvalidTypedData(String),
    #[error("Invalid signature returned: `{0}`")]
    InvalidSignature(String),
}
