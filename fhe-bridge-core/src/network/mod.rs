//! Runtime strategies binding a coprocessor instance to a ledger connection.
//!
//! An interactive strategy wraps a wallet-style provider supplied by the caller, a headless
//! strategy answers the same request surface from a directly held RPC connection and key.

pub mod headless;
pub mod interactive;
pub mod signer;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::U256;
use serde_json::Value;
use thiserror::Error;

pub use headless::{HeadlessRpcShim, HeadlessStrategy};
pub use interactive::InteractiveStrategy;
pub use signer::{KeyHolder, KeyHolderError, ProviderKeyHolder, WalletKeyHolder};

/// A wallet-style request provider, in the shape of EIP-1193.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Performs a JSON-RPC style request
    async fn request(&self, method: &str, params: Value) -> Result<Value, NetworkError>;

    /// Registers interest in a provider event
    fn on(&self, event: &str);

    /// Drops interest in a provider event
    fn remove_listener(&self, event: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    Interactive,
    Headless,
}

/// One way of reaching the ledger, chosen once when the instance is created.
#[async_trait]
pub trait NetworkStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// The provider the coprocessor client talks through
    fn provider(&self) -> Arc<dyn Eip1193Provider>;

    /// The chain the strategy is connected to
    async fn chain_id(&self) -> Result<u64, NetworkError>;

    /// The key holder controlling the strategy's default account
    async fn key_holder(&self) -> Result<Arc<dyn KeyHolder>, NetworkError>;
}

/// Parses an `eth_chainId` reply, a hex quantity string or a plain number.
///
/// # Errors
///
/// Returns an error if the value is neither, or does not fit a `u64`.
pub fn parse_chain_id(value: &Value) -> Result<u64, NetworkError> {
    let invalid = || NetworkError::InvalidResponse(format!("invalid chain id: {value}"));
    match value {
        Value::Number(number) => number.as_u64().ok_or_else(invalid),
        Value::String(text) => {
            let chain_id = match text.strip_prefix("0x") {
                Some(digits) => U256::from_str_radix(digits, 16).map_err(|_| invalid())?,
                None => U256::from_dec_str(text).map_err(|_| invalid())?,
            };
            if chain_id > U256::from(u64::MAX) {
                return Err(invalid());
            }
            Ok(chain_id.as_u64())
        }
        _ => Err(invalid()),
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Provider request `{method}` failed: {message}")]
    Request { method: String, message: String },
    #[error("Unsupported provider method: `{0}`")]
    UnsupportedMethod(String),
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("Invalid request parameters for `{method}`: {message}")]
    InvalidParams { method: String, message: String },
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("Invalid RPC url: `{0}`")]
    InvalidUrl(#[from] url::ParseError),
    #[error("RPC provider error: `{0}`")]
    Provider(#[from] ethers::providers::ProviderError),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_chain_id() {
        assert_eq!(parse_chain_id(&json!("0xaa36a7")).unwrap(), 11_155_111);
        assert_eq!(parse_chain_id(&json!("31337")).unwrap(), 31_337);
        assert_eq!(parse_chain_id(&json!(1)).unwrap(), 1);
        assert!(parse_chain_id(&json!("0xzz")).is_err());
        assert!(parse_chain_id(&json!(null)).is_err());
        assert!(parse_chain_id(&json!("0x10000000000000000")).is_err());
    }
}
