use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

use super::{
    parse_chain_id, Eip1193Provider, KeyHolder, NetworkError, NetworkStrategy, ProviderKeyHolder,
    StrategyKind,
};

/// Binds the instance to a wallet-style provider supplied by the caller.
///
/// The instance is keyed by the chain the provider reports, and signatures are requested
/// from the provider's selected account.
pub struct InteractiveStrategy {
    provider: Arc<dyn Eip1193Provider>,
}

impl InteractiveStrategy {
    /// Constructor
    #[must_use]
    pub fn new(provider: Arc<dyn Eip1193Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl NetworkStrategy for InteractiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Interactive
    }

    fn provider(&self) -> Arc<dyn Eip1193Provider> {
        self.provider.clone()
    }

    #[instrument(level = "debug", skip_all)]
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        let chain_id = self.provider.request("eth_chainId", json!([])).await?;
        parse_chain_id(&chain_id)
    }

    async fn key_holder(&self) -> Result<Arc<dyn KeyHolder>, NetworkError> {
        let key_holder = ProviderKeyHolder::connect(self.provider.clone()).await?;
        Ok(Arc::new(key_holder))
    }
}
