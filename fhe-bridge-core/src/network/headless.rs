use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, BlockId, TransactionRequest},
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{
    Eip1193Provider, KeyHolder, NetworkError, NetworkStrategy, StrategyKind, WalletKeyHolder,
};

/// Answers the minimal provider surface from an RPC connection and a local key.
///
/// Only `eth_chainId`, `eth_accounts`, `eth_requestAccounts`, `eth_call` and
/// `eth_sendTransaction` are served, event subscriptions are accepted and ignored.
pub struct HeadlessRpcShim {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
}

impl HeadlessRpcShim {
    /// Connects the shim to `rpc_url`, signing with `private_key` for `chain_id`.
    ///
    /// No request is made here, an unreachable node surfaces on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the url or the private key cannot be parsed.
    pub fn new(rpc_url: &str, private_key: &str, chain_id: u64) -> Result<Self, NetworkError> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);
        let wallet = LocalWallet::from_str(private_key)
            .map_err(|e| NetworkError::InvalidPrivateKey(e.to_string()))?
            .with_chain_id(chain_id);
        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
        })
    }

    #[must_use]
    pub fn wallet(&self) -> &LocalWallet {
        self.client.signer()
    }

    fn transaction_from_params(method: &str, params: &Value) -> Result<TypedTransaction, NetworkError> {
        let request = params
            .as_array()
            .and_then(|params| params.first())
            .cloned()
            .ok_or_else(|| NetworkError::InvalidParams {
                method: method.to_string(),
                message: "missing transaction object".to_string(),
            })?;
        let request: TransactionRequest =
            serde_json::from_value(request).map_err(|e| NetworkError::InvalidParams {
                method: method.to_string(),
                message: e.to_string(),
            })?;
        Ok(request.into())
    }

    fn block_from_params(method: &str, params: &Value) -> Result<Option<BlockId>, NetworkError> {
        params
            .as_array()
            .and_then(|params| params.get(1))
            .map(|block| {
                serde_json::from_value::<BlockId>(block.clone()).map_err(|e| {
                    NetworkError::InvalidParams {
                        method: method.to_string(),
                        message: e.to_string(),
                    }
                })
            })
            .transpose()
    }
}

fn to_json<T: serde::Serialize>(method: &str, value: T) -> Result<Value, NetworkError> {
    serde_json::to_value(value).map_err(|e| NetworkError::Request {
        method: method.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl Eip1193Provider for HeadlessRpcShim {
    #[instrument(level = "debug", skip(self, params))]
    async fn request(&self, method: &str, params: Value) -> Result<Value, NetworkError> {
        match method {
            "eth_chainId" => {
                let chain_id = self.client.get_chainid().await.map_err(|e| NetworkError::Request {
                    method: method.to_string(),
                    message: e.to_string(),
                })?;
                to_json(method, chain_id)
            }
            "eth_accounts" | "eth_requestAccounts" => Ok(json!([self.wallet().address()])),
            "eth_call" => {
                let transaction = Self::transaction_from_params(method, &params)?;
                let block = Self::block_from_params(method, &params)?;
                let output = self
                    .client
                    .call(&transaction, block)
                    .await
                    .map_err(|e| NetworkError::Request {
                        method: method.to_string(),
                        message: e.to_string(),
                    })?;
                to_json(method, output)
            }
            "eth_sendTransaction" => {
                let transaction = Self::transaction_from_params(method, &params)?;
                let pending = self
                    .client
                    .send_transaction(transaction, None)
                    .await
                    .map_err(|e| NetworkError::Request {
                        method: method.to_string(),
                        message: e.to_string(),
                    })?;
                let tx_hash = pending.tx_hash();
                info!(
                    target = "fhe-bridge-network",
                    event = "headless_transaction_sent",
                    tx_hash = ?tx_hash,
                    "Transaction sent through the headless shim"
                );
                to_json(method, tx_hash)
            }
            other => Err(NetworkError::UnsupportedMethod(other.to_string())),
        }
    }

    fn on(&self, _event: &str) {}

    fn remove_listener(&self, _event: &str) {}
}

/// Drives the instance from a directly held RPC connection and signing key.
pub struct HeadlessStrategy {
    shim: Arc<HeadlessRpcShim>,
}

impl HeadlessStrategy {
    /// Constructor
    ///
    /// # Errors
    ///
    /// Returns an error if the url or the private key cannot be parsed.
    pub fn new(rpc_url: &str, private_key: &str, chain_id: u64) -> Result<Self, NetworkError> {
        Ok(Self {
            shim: Arc::new(HeadlessRpcShim::new(rpc_url, private_key, chain_id)?),
        })
    }
}

#[async_trait]
impl NetworkStrategy for HeadlessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Headless
    }

    fn provider(&self) -> Arc<dyn Eip1193Provider> {
        self.shim.clone()
    }

    async fn chain_id(&self) -> Result<u64, NetworkError> {
        let chain_id = self.shim.request("eth_chainId", json!([])).await?;
        super::parse_chain_id(&chain_id)
    }

    async fn key_holder(&self) -> Result<Arc<dyn KeyHolder>, NetworkError> {
        Ok(Arc::new(WalletKeyHolder::new(self.shim.wallet().clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{spawn_rpc_node, NODE_CALL_OUTPUT, NODE_TX_HASH};

    const PRIVATE_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const RPC_URL: &str = "http://127.0.0.1:1";

    #[tokio::test]
    async fn test_shim_serves_accounts_locally() {
        let shim = HeadlessRpcShim::new(RPC_URL, PRIVATE_KEY, 31337).unwrap();
        let address = shim.wallet().address();
        for method in ["eth_accounts", "eth_requestAccounts"] {
            let accounts = shim.request(method, json!([])).await.unwrap();
            assert_eq!(accounts, json!([address]));
        }
        assert_eq!(shim.wallet().chain_id(), 31337);
    }

    #[tokio::test]
    async fn test_shim_rejects_unknown_methods() {
        let shim = HeadlessRpcShim::new(RPC_URL, PRIVATE_KEY, 31337).unwrap();
        assert!(matches!(
            shim.request("eth_sign", json!([])).await,
            Err(NetworkError::UnsupportedMethod(method)) if method == "eth_sign"
        ));
        shim.on("accountsChanged");
        shim.remove_listener("accountsChanged");
    }

    #[tokio::test]
    async fn test_shim_validates_call_params() {
        let shim = HeadlessRpcShim::new(RPC_URL, PRIVATE_KEY, 31337).unwrap();
        assert!(matches!(
            shim.request("eth_call", json!([])).await,
            Err(NetworkError::InvalidParams { .. })
        ));
        assert!(matches!(
            shim.request("eth_sendTransaction", json!(["not a transaction"])).await,
            Err(NetworkError::InvalidParams { .. })
        ));
    }

    #[tokio::test]
    async fn test_shim_forwards_to_the_node() {
        let (rpc_url, requests) = spawn_rpc_node().await;
        let shim = HeadlessRpcShim::new(&rpc_url, PRIVATE_KEY, 31337).unwrap();

        let chain_id = shim.request("eth_chainId", json!([])).await.unwrap();
        assert_eq!(chain_id, json!("0x7a69"));

        let target = "0x1111111111111111111111111111111111111111";
        let output = shim
            .request("eth_call", json!([{ "to": target, "data": "0x01" }]))
            .await
            .unwrap();
        assert_eq!(output, json!(NODE_CALL_OUTPUT));

        let tx_hash = shim
            .request("eth_sendTransaction", json!([{ "to": target, "value": "0x1" }]))
            .await
            .unwrap();
        assert_eq!(tx_hash, json!(NODE_TX_HASH));

        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests[..2], ["eth_chainId", "eth_call"]);
        assert!(requests.iter().any(|method| method == "eth_getTransactionCount"));
        assert_eq!(requests.last().map(String::as_str), Some("eth_sendRawTransaction"));
    }

    #[tokio::test]
    async fn test_strategy_reads_chain_from_the_node() {
        let (rpc_url, _requests) = spawn_rpc_node().await;
        let strategy = HeadlessStrategy::new(&rpc_url, PRIVATE_KEY, 31337).unwrap();
        assert_eq!(strategy.chain_id().await.unwrap(), 31337);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_a_request_error() {
        let strategy = HeadlessStrategy::new(RPC_URL, PRIVATE_KEY, 31337).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::Headless);
        assert!(matches!(
            strategy.chain_id().await,
            Err(NetworkError::Request { .. })
        ));
    }

    #[tokio::test]
    async fn test_headless_key_holder_uses_local_wallet() {
        let strategy = HeadlessStrategy::new(RPC_URL, PRIVATE_KEY, 31337).unwrap();
        let key_holder = strategy.key_holder().await.unwrap();
        let expected = WalletKeyHolder::from_private_key(PRIVATE_KEY).unwrap();
        assert_eq!(key_holder.address(), expected.address());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            HeadlessRpcShim::new("not a url", PRIVATE_KEY, 1),
            Err(NetworkError::InvalidUrl(_))
        ));
        assert!(matches!(
            HeadlessRpcShim::new(RPC_URL, "0x12", 1),
            Err(NetworkError::InvalidPrivateKey(_))
        ));
    }
}
