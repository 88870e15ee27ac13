use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use ethers::types::Address;
use tokio::sync::{mpsc::UnboundedSender, Mutex};
use tracing::{error, info, instrument};

use crate::{
    config::FheBridgeConfig,
    coprocessor::{Coprocessor, CoprocessorFactory},
    errors::FheBridgeError,
    network::{
        Eip1193Provider, HeadlessStrategy, InteractiveStrategy, KeyHolder, NetworkStrategy,
    },
    progress::{ProgressEvent, ProgressReporter, Step},
    relayer::RelayerFactory,
    types::{BitWidth, EncryptedInput, PublicDecryptionResult, UserDecryptionResult},
};

/// Shared handle to a coprocessor instance
pub type InstanceHandle = Arc<FheInstance>;

/// A coprocessor client bound to a configuration, a chain and a network strategy.
pub struct FheInstance {
    config: FheBridgeConfig,
    chain_id: u64,
    strategy: Arc<dyn NetworkStrategy>,
    coprocessor: Arc<dyn Coprocessor>,
    progress: ProgressReporter,
}

impl FheInstance {
    /// Constructor
    #[must_use]
    pub fn new(
        config: FheBridgeConfig,
        chain_id: u64,
        strategy: Arc<dyn NetworkStrategy>,
        coprocessor: Arc<dyn Coprocessor>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            config,
            chain_id,
            strategy,
            coprocessor,
            progress,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &FheBridgeConfig {
        &self.config
    }

    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    #[must_use]
    pub fn strategy(&self) -> &dyn NetworkStrategy {
        self.strategy.as_ref()
    }

    #[must_use]
    pub fn coprocessor(&self) -> &dyn Coprocessor {
        self.coprocessor.as_ref()
    }

    #[must_use]
    pub const fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// The key holder of the strategy's default account.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::Environment`] if the strategy exposes no usable account.
    pub async fn default_key_holder(&self) -> Result<Arc<dyn KeyHolder>, FheBridgeError> {
        self.strategy
            .key_holder()
            .await
            .map_err(|e| FheBridgeError::Environment(e.to_string()))
    }
}

impl fmt::Debug for FheInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FheInstance")
            .field("chain_id", &self.chain_id)
            .field("strategy", &self.strategy.kind())
            .finish_non_exhaustive()
    }
}

/// Options for creating an instance.
///
/// An interactive provider takes precedence. Without one, an RPC url (from the options or
/// the configuration) and a private key select headless operation.
#[derive(Clone)]
pub struct InstanceOptions {
    config: FheBridgeConfig,
    provider: Option<Arc<dyn Eip1193Provider>>,
    rpc_url: Option<String>,
    private_key: Option<String>,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl InstanceOptions {
    #[must_use]
    pub const fn new(config: FheBridgeConfig) -> Self {
        Self {
            config,
            provider: None,
            rpc_url: None,
            private_key: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn Eip1193Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Selects headless operation through `rpc_url`, signing with `private_key`
    #[must_use]
    pub fn with_headless(mut self, rpc_url: Option<String>, private_key: String) -> Self {
        self.rpc_url = rpc_url;
        self.private_key = Some(private_key);
        self
    }

    /// Routes progress events of the instance to `sender`
    #[must_use]
    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &FheBridgeConfig {
        &self.config
    }
}

/// Picks the network strategy for `options`.
///
/// # Errors
///
/// Returns [`FheBridgeError::Environment`] if neither a provider nor an RPC url and private
/// key are available, or if the headless parameters are invalid.
pub fn select_strategy(options: &InstanceOptions) -> Result<Arc<dyn NetworkStrategy>, FheBridgeError> {
    if let Some(provider) = &options.provider {
        return Ok(Arc::new(InteractiveStrategy::new(provider.clone())));
    }
    let rpc_url = options
        .rpc_url
        .as_deref()
        .or_else(|| options.config.rpc_url());
    match (rpc_url, options.private_key.as_deref()) {
        (Some(rpc_url), Some(private_key)) => {
            let strategy = HeadlessStrategy::new(rpc_url, private_key, options.config.chain_id())
                .map_err(|e| FheBridgeError::Environment(e.to_string()))?;
            Ok(Arc::new(strategy))
        }
        _ => Err(FheBridgeError::Environment(
            "no interactive provider, and no RPC url and private key for headless operation"
                .to_string(),
        )),
    }
}

/// Creates an instance, independent of any registry.
///
/// # Errors
///
/// Returns [`FheBridgeError::Environment`] if no strategy applies, and
/// [`FheBridgeError::InstanceCreation`] if the chain cannot be queried, does not match the
/// configuration, or the coprocessor rejects the configuration.
#[instrument(level = "info", skip_all, fields(chain_id = options.config.chain_id()))]
pub async fn create_instance(
    factory: &dyn CoprocessorFactory,
    options: InstanceOptions,
) -> Result<InstanceHandle, FheBridgeError> {
    let strategy = select_strategy(&options)?;
    let chain_id = strategy
        .chain_id()
        .await
        .map_err(|e| FheBridgeError::InstanceCreation(format!("failed to query chain id: {e}")))?;
    if chain_id != options.config.chain_id() {
        error!(
            target = "fhe-bridge-instance",
            event = "chain_id_mismatch",
            expected = options.config.chain_id(),
            actual = chain_id,
            "Connected chain does not match the configuration"
        );
        return Err(FheBridgeError::InstanceCreation(format!(
            "connected to chain {chain_id}, configuration expects {}",
            options.config.chain_id()
        )));
    }
    let coprocessor = factory
        .create(&options.config, chain_id)
        .await
        .map_err(|e| FheBridgeError::InstanceCreation(e.to_string()))?;

    let progress = ProgressReporter::new(options.progress);
    info!(
        target = "fhe-bridge-instance",
        event = "instance_created",
        chain_id,
        strategy = ?strategy.kind(),
        "Coprocessor instance created"
    );
    progress.report(
        Step::InstanceCreated,
        format!("chain {chain_id}, {:?} strategy", strategy.kind()),
    );
    Ok(Arc::new(FheInstance::new(
        options.config,
        chain_id,
        strategy,
        coprocessor,
        progress,
    )))
}

/// Registry tracking the current instance of a process or tenant.
///
/// The registry is passed by reference to whoever needs it, several may coexist.
/// [`InstanceManager::initialize`] is not serialized, concurrent calls race and the last
/// one wins. [`InstanceManager::get_or_initialize`] is single-flight.
pub struct InstanceManager {
    factory: Arc<dyn CoprocessorFactory>,
    current: RwLock<Option<InstanceHandle>>,
    initialization: Mutex<()>,
}

impl InstanceManager {
    #[must_use]
    pub fn new(factory: Arc<dyn CoprocessorFactory>) -> Self {
        Self {
            factory,
            current: RwLock::new(None),
            initialization: Mutex::new(()),
        }
    }

    /// A registry creating relayer-backed instances
    #[must_use]
    pub fn with_relayer() -> Self {
        Self::new(Arc::new(RelayerFactory))
    }

    /// Creates an instance and makes it current, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Same as [`create_instance`]. The current instance is left untouched on failure.
    pub async fn initialize(&self, options: InstanceOptions) -> Result<InstanceHandle, FheBridgeError> {
        let instance = create_instance(self.factory.as_ref(), options).await?;
        self.set_current(instance.clone());
        Ok(instance)
    }

    /// Returns the current instance, or creates one if there is none.
    ///
    /// Concurrent callers wait for a single initialization and share its result.
    ///
    /// # Errors
    ///
    /// Same as [`create_instance`].
    pub async fn get_or_initialize(
        &self,
        options: InstanceOptions,
    ) -> Result<InstanceHandle, FheBridgeError> {
        let _guard = self.initialization.lock().await;
        if let Some(instance) = self.current() {
            return Ok(instance);
        }
        self.initialize(options).await
    }

    #[must_use]
    pub fn current(&self) -> Option<InstanceHandle> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current instance.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::NotInitialized`] if there is none.
    pub fn require_current(&self) -> Result<InstanceHandle, FheBridgeError> {
        self.current().ok_or(FheBridgeError::NotInitialized)
    }

    pub fn set_current(&self, instance: InstanceHandle) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(instance);
    }

    pub fn clear(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// [`FheInstance::encrypt`] on the current instance.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::NotInitialized`] if there is no current instance.
    pub async fn encrypt(
        &self,
        contract_address: Address,
        user_address: Address,
        value: u128,
        bit_width: Option<BitWidth>,
    ) -> Result<EncryptedInput, FheBridgeError> {
        self.require_current()?
            .encrypt(contract_address, user_address, value, bit_width)
            .await
    }

    /// [`FheInstance::decrypt_authenticated`] on the current instance.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::NotInitialized`] if there is no current instance.
    pub async fn decrypt_authenticated<H: AsRef<str>>(
        &self,
        contract_address: Address,
        key_holder: &dyn KeyHolder,
        handles: &[H],
        validity_days: Option<u64>,
    ) -> Result<UserDecryptionResult, FheBridgeError> {
        self.require_current()?
            .decrypt_authenticated(contract_address, key_holder, handles, validity_days)
            .await
    }

    /// [`FheInstance::decrypt_public`] on the current instance.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::NotInitialized`] if there is no current instance.
    pub async fn decrypt_public<H: AsRef<str>>(
        &self,
        handles: &[H],
    ) -> Result<PublicDecryptionResult, FheBridgeError> {
        self.require_current()?.decrypt_public(handles).await
    }
}
