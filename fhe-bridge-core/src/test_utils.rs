use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip712::{Eip712, TypedData},
        Address, Signature, H256,
    },
    utils::keccak256,
};
use fhe_bridge_utils::encoding::to_prefixed_hex;
use serde_json::{json, Value};

use crate::{
    authorization::build_user_decrypt_typed_data,
    config::{Builder, FheBridgeConfig},
    coprocessor::{
        Coprocessor, CoprocessorError, CoprocessorFactory, InputProofRequest, UserDecryptRequest,
    },
    instance::FheInstance,
    keypair::EphemeralKeypair,
    network::{
        signer::SIGN_TYPED_DATA_METHOD, Eip1193Provider, InteractiveStrategy, NetworkError,
        WalletKeyHolder,
    },
    normalize::{RawEncryptionResult, RawPublicDecryption},
    progress::ProgressReporter,
    types::{CiphertextHandle, ClearValue},
};

pub const TEST_CHAIN_ID: u64 = 31337;
pub const TEST_PRIVATE_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn test_config() -> FheBridgeConfig {
    Builder::new()
        .chain_id(TEST_CHAIN_ID)
        .gateway_chain_id(55_815)
        .acl_contract_address(Address::repeat_byte(0x01))
        .kms_contract_address(Address::repeat_byte(0x02))
        .input_verifier_contract_address(Address::repeat_byte(0x03))
        .verifying_contract_address_decryption(Address::repeat_byte(0x04))
        .verifying_contract_address_input_verification(Address::repeat_byte(0x05))
        .relayer_url("http://127.0.0.1:1".to_string())
        .build()
}

pub fn test_typed_data() -> TypedData {
    build_user_decrypt_typed_data(
        &test_config(),
        &to_prefixed_hex([0x11u8; 32]),
        &[Address::repeat_byte(0xab)],
        1_700_000_000,
        10,
    )
    .unwrap()
}

pub fn test_key_holder() -> WalletKeyHolder {
    WalletKeyHolder::from_private_key(TEST_PRIVATE_KEY).unwrap()
}

pub fn mock_instance(coprocessor: MockCoprocessor) -> FheInstance {
    FheInstance::for_testing(test_config(), Arc::new(coprocessor), ProgressReporter::default())
}

impl FheInstance {
    pub fn for_testing(
        config: FheBridgeConfig,
        coprocessor: Arc<dyn Coprocessor>,
        progress: ProgressReporter,
    ) -> Self {
        let provider = Arc::new(MockProvider::new(config.chain_id()));
        Self::new(
            config.clone(),
            config.chain_id(),
            Arc::new(InteractiveStrategy::new(provider)),
            coprocessor,
            progress,
        )
    }
}

/// The shape in which the mock reports finalized inputs
#[derive(Clone, Copy, Debug)]
pub enum ResponseShape {
    HandleArray,
    Direct,
    Scalar,
}

struct StoredValue {
    value: u128,
    contract_address: Address,
    user_address: Address,
}

struct MockState {
    next_handle: u64,
    stored: HashMap<CiphertextHandle, StoredValue>,
    public: HashSet<CiphertextHandle>,
    shape: ResponseShape,
    network_failure: bool,
    rejection: Option<String>,
    dropped: HashSet<CiphertextHandle>,
    overrides: HashMap<CiphertextHandle, ClearValue>,
    public_response: Option<Value>,
    last_user_decrypt: Option<UserDecryptRequest>,
    encrypt_calls: usize,
    user_decrypt_calls: usize,
    public_decrypt_calls: usize,
    keypairs_generated: usize,
}

/// An in-memory coprocessor. It stores plaintexts per handle, checks signatures and
/// per-user access like the real service does, and counts every call.
#[derive(Clone)]
pub struct MockCoprocessor {
    config: FheBridgeConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockCoprocessor {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            state: Arc::new(Mutex::new(MockState {
                next_handle: 0,
                stored: HashMap::new(),
                public: HashSet::new(),
                shape: ResponseShape::HandleArray,
                network_failure: false,
                rejection: None,
                dropped: HashSet::new(),
                overrides: HashMap::new(),
                public_response: None,
                last_user_decrypt: None,
                encrypt_calls: 0,
                user_decrypt_calls: 0,
                public_decrypt_calls: 0,
                keypairs_generated: 0,
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_shape(self, shape: ResponseShape) -> Self {
        self.state().shape = shape;
        self
    }

    pub fn failing_with_network_error(self) -> Self {
        self.set_network_failure(true);
        self
    }

    pub fn rejecting(self, message: &str) -> Self {
        self.state().rejection = Some(message.to_string());
        self
    }

    pub fn with_public_response(self, response: Value) -> Self {
        self.state().public_response = Some(response);
        self
    }

    pub fn set_network_failure(&self, failing: bool) {
        self.state().network_failure = failing;
    }

    pub fn mark_public(&self, handle: CiphertextHandle) {
        self.state().public.insert(handle);
    }

    pub fn drop_from_user_responses(&self, handle: CiphertextHandle) {
        self.state().dropped.insert(handle);
    }

    pub fn override_clear_value(&self, handle: CiphertextHandle, value: ClearValue) {
        self.state().overrides.insert(handle, value);
    }

    pub fn stored_value(&self, handle: &CiphertextHandle) -> Option<u128> {
        self.state().stored.get(handle).map(|stored| stored.value)
    }

    pub fn last_user_decrypt(&self) -> Option<UserDecryptRequest> {
        self.state().last_user_decrypt.clone()
    }

    pub fn encrypt_calls(&self) -> usize {
        self.state().encrypt_calls
    }

    pub fn user_decrypt_calls(&self) -> usize {
        self.state().user_decrypt_calls
    }

    pub fn public_decrypt_calls(&self) -> usize {
        self.state().public_decrypt_calls
    }

    pub fn keypairs_generated(&self) -> usize {
        self.state().keypairs_generated
    }

    fn check_failures(state: &MockState) -> Result<(), CoprocessorError> {
        if state.network_failure {
            return Err(CoprocessorError::Other(
                "TypeError: Failed to fetch".to_string(),
            ));
        }
        if let Some(message) = &state.rejection {
            return Err(CoprocessorError::Rejected {
                status: 400,
                message: message.clone(),
            });
        }
        Ok(())
    }

    fn verify_signature(&self, request: &UserDecryptRequest) -> Result<(), CoprocessorError> {
        let typed_data = build_user_decrypt_typed_data(
            &self.config,
            &request.keypair.public_key_hex(),
            &request.contract_addresses,
            request.start_timestamp,
            request.duration_days,
        )
        .unwrap();
        let digest = H256::from(typed_data.encode_eip712().unwrap());
        let invalid = || CoprocessorError::Rejected {
            status: 400,
            message: "invalid signature".to_string(),
        };
        let signature = Signature::from_str(&request.signature).map_err(|_| invalid())?;
        match signature.recover(digest) {
            Ok(signer) if signer == request.user_address => Ok(()),
            _ => Err(invalid()),
        }
    }
}

#[async_trait]
impl Coprocessor for MockCoprocessor {
    fn generate_keypair(&self) -> EphemeralKeypair {
        self.state().keypairs_generated += 1;
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
        .map_err(|e| CoprocessorError::Other(e.to_string()))
    }

    async fn encrypt_input(
        &self,
        request: InputProofRequest,
    ) -> Result<RawEncryptionResult, CoprocessorError> {
        let mut state = self.state();
        state.encrypt_calls += 1;
        Self::check_failures(&state)?;

        let mut handles = Vec::with_capacity(request.values.len());
        for (value, _) in &request.values {
            state.next_handle += 1;
            let mut seed = state.next_handle.to_be_bytes().to_vec();
            seed.extend_from_slice(request.contract_address.as_bytes());
            let handle = CiphertextHandle::from_bytes(keccak256(seed));
            state.stored.insert(
                handle,
                StoredValue {
                    value: *value,
                    contract_address: request.contract_address,
                    user_address: request.user_address,
                },
            );
            handles.push(handle);
        }
        let proof = to_prefixed_hex([0x01, u8::try_from(handles.len()).unwrap_or(u8::MAX)]);
        let response = match state.shape {
            ResponseShape::HandleArray => json!({ "handles": handles, "inputProof": proof }),
            ResponseShape::Direct => json!({ "data": handles[0], "proof": proof }),
            ResponseShape::Scalar => json!(proof),
        };
        Ok(RawEncryptionResult::from_json(response))
    }

    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<HashMap<CiphertextHandle, ClearValue>, CoprocessorError> {
        let mut state = self.state();
        state.user_decrypt_calls += 1;
        state.last_user_decrypt = Some(request.clone());
        Self::check_failures(&state)?;
        self.verify_signature(&request)?;

        let mut clear_values = HashMap::new();
        for pair in request.handle_contract_pairs.iter().rev() {
            let stored = state
                .stored
                .get(&pair.handle)
                .filter(|stored| {
                    stored.user_address == request.user_address
                        && stored.contract_address == pair.contract_address
                })
                .ok_or_else(|| CoprocessorError::Rejected {
                    status: 403,
                    message: format!("not authorized to decrypt {}", pair.handle),
                })?;
            if state.dropped.contains(&pair.handle) {
                continue;
            }
            let value = state
                .overrides
                .get(&pair.handle)
                .cloned()
                .unwrap_or_else(|| ClearValue::Text(format!("{}n", stored.value)));
            clear_values.insert(pair.handle, value);
        }
        Ok(clear_values)
    }

    async fn public_decrypt(
        &self,
        handles: &[CiphertextHandle],
    ) -> Result<RawPublicDecryption, CoprocessorError> {
        let mut state = self.state();
        state.public_decrypt_calls += 1;
        Self::check_failures(&state)?;
        if let Some(response) = &state.public_response {
            return serde_json::from_value(response.clone())
                .map_err(|e| CoprocessorError::MalformedResponse(e.to_string()));
        }

        let mut clear_values = serde_json::Map::new();
        for handle in handles {
            let stored = state
                .stored
                .get(handle)
                .filter(|_| state.public.contains(handle))
                .ok_or_else(|| CoprocessorError::Rejected {
                    status: 400,
                    message: format!("{handle} is not publicly decryptable"),
                })?;
            clear_values.insert(handle.to_string(), json!(format!("{}n", stored.value)));
        }
        serde_json::from_value(json!({
            "clearValues": clear_values,
            "decryptionProof": to_prefixed_hex([0xab; 65]),
        }))
        .map_err(|e| CoprocessorError::MalformedResponse(e.to_string()))
    }
}

/// Hands out clones of one [`MockCoprocessor`], optionally slowly or failing.
pub struct MockCoprocessorFactory {
    coprocessor: MockCoprocessor,
    created: AtomicUsize,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl MockCoprocessorFactory {
    pub fn new(coprocessor: MockCoprocessor) -> Self {
        Self {
            coprocessor,
            created: AtomicUsize::new(0),
            delay: None,
            failure: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoprocessorFactory for MockCoprocessorFactory {
    async fn create(
        &self,
        _config: &FheBridgeConfig,
        _chain_id: u64,
    ) -> Result<Arc<dyn Coprocessor>, CoprocessorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(CoprocessorError::Network(message.clone()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.coprocessor.clone()))
    }
}

/// An interactive provider backed by a local wallet
pub struct MockProvider {
    chain_id: u64,
    wallet: LocalWallet,
    accounts: bool,
    sign_requests: AtomicUsize,
}

impl MockProvider {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            wallet: LocalWallet::from_str(&TEST_PRIVATE_KEY[2..]).unwrap(),
            accounts: true,
            sign_requests: AtomicUsize::new(0),
        }
    }

    pub fn without_accounts(mut self) -> Self {
        self.accounts = false;
        self
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn sign_requests(&self) -> usize {
        self.sign_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Eip1193Provider for MockProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, NetworkError> {
        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id))),
            "eth_accounts" | "eth_requestAccounts" => {
                if self.accounts {
                    Ok(json!([self.address()]))
                } else {
                    Ok(json!([]))
                }
            }
            SIGN_TYPED_DATA_METHOD => {
                self.sign_requests.fetch_add(1, Ordering::SeqCst);
                let payload = params[1].as_str().unwrap();
                let typed_data: TypedData = serde_json::from_str(payload).unwrap();
                let signature = self.wallet.sign_typed_data(&typed_data).await.unwrap();
                Ok(json!(to_prefixed_hex(signature.to_vec())))
            }
            other => Err(NetworkError::UnsupportedMethod(other.to_string())),
        }
    }

    fn on(&self, _event: &str) {}

    fn remove_listener(&self, _event: &str) {}
}

pub const NODE_CALL_OUTPUT: &str = "0xc0ffee";
pub const NODE_TX_HASH: &str = "0xabababababababababababababababababababababababababababababababab";

/// JSON-RPC methods received by a node from [`spawn_rpc_node`], in order
pub type NodeRequests = Arc<Mutex<Vec<String>>>;

async fn rpc_node(
    axum::extract::State(requests): axum::extract::State<NodeRequests>,
    axum::Json(request): axum::Json<Value>,
) -> axum::Json<Value> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    requests.lock().unwrap().push(method.clone());
    let result = match method.as_str() {
        "eth_chainId" => json!(format!("{TEST_CHAIN_ID:#x}")),
        "eth_call" => json!(NODE_CALL_OUTPUT),
        "eth_getTransactionCount" => json!("0x0"),
        "eth_gasPrice" => json!("0x3b9aca00"),
        "eth_estimateGas" => json!("0x5208"),
        "eth_sendRawTransaction" => json!(NODE_TX_HASH),
        _ => {
            return axum::Json(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": { "code": -32601, "message": "method not found" },
            }))
        }
    };
    axum::Json(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
}

/// Starts a minimal ledger node on an ephemeral port and returns its url
pub async fn spawn_rpc_node() -> (String, NodeRequests) {
    let requests = NodeRequests::default();
    let app = axum::Router::new()
        .route("/", axum::routing::post(rpc_node))
        .with_state(requests.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{address}"), requests)
}
