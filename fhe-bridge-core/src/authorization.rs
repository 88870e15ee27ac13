use chrono::Utc;
use ethers::types::{transaction::eip712::TypedData, Address};
use serde_json::json;

use crate::{config::FheBridgeConfig, keypair::EphemeralKeypair};

/// Primary type of the user decryption authorization
pub const USER_DECRYPT_PRIMARY_TYPE: &str = "UserDecryptRequestVerification";

/// Name of the typed data domain
pub const DOMAIN_NAME: &str = "Decryption";

/// Version of the typed data domain
pub const DOMAIN_VERSION: &str = "1";

/// Validity window used when the caller does not pick one
pub const DEFAULT_VALIDITY_DAYS: u64 = 10;

/// Longest validity window the coprocessor accepts
pub const MAX_VALIDITY_DAYS: u64 = 365;

const SECONDS_PER_DAY: u64 = 86_400;

/// Extra data carried by every request, a single zero byte
pub const EXTRA_DATA: &str = "0x00";

/// Builds the typed structured data a key holder signs to authorize a user decryption.
///
/// The message binds the ephemeral public key, the contracts the authorization is scoped
/// to and the `[start_timestamp, start_timestamp + duration_days)` validity window. The
/// timestamp and duration are rendered as decimal strings.
///
/// # Errors
///
/// Returns an error if the assembled document is not valid typed data.
pub fn build_user_decrypt_typed_data(
    config: &FheBridgeConfig,
    public_key: &str,
    contract_addresses: &[Address],
    start_timestamp: u64,
    duration_days: u64,
) -> Result<TypedData, serde_json::Error> {
    serde_json::from_value(json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" },
            ],
            USER_DECRYPT_PRIMARY_TYPE: [
                { "name": "publicKey", "type": "bytes" },
                { "name": "contractAddresses", "type": "address[]" },
                { "name": "startTimestamp", "type": "uint256" },
                { "name": "durationDays", "type": "uint256" },
                { "name": "extraData", "type": "bytes" },
            ],
        },
        "primaryType": USER_DECRYPT_PRIMARY_TYPE,
        "domain": {
            "name": DOMAIN_NAME,
            "version": DOMAIN_VERSION,
            "chainId": config.gateway_chain_id(),
            "verifyingContract": config.verifying_contract_address_decryption(),
        },
        "message": {
            "publicKey": public_key,
            "contractAddresses": contract_addresses,
            "startTimestamp": start_timestamp.to_string(),
            "durationDays": duration_days.to_string(),
            "extraData": EXTRA_DATA,
        },
    }))
}

/// Checks a requested validity window, in days.
///
/// # Errors
///
/// Returns a description of the problem if the window is outside `1..=365`.
pub fn validate_validity_days(duration_days: u64) -> Result<(), String> {
    if (1..=MAX_VALIDITY_DAYS).contains(&duration_days) {
        Ok(())
    } else {
        Err(format!(
            "validity must be between 1 and {MAX_VALIDITY_DAYS} days, got {duration_days}"
        ))
    }
}

/// Drops a leading `0x` from a signature, as the coprocessor expects it bare.
#[must_use]
pub fn strip_hex_prefix(signature: &str) -> &str {
    signature.strip_prefix("0x").unwrap_or(signature)
}

/// Current unix time, in seconds
#[must_use]
pub fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

/// A signed user decryption authorization, reusable for any handle of the contracts it
/// covers until its validity window closes.
#[derive(Clone, Debug)]
pub struct SignedAuthorization {
    typed_data: TypedData,
    /// Signature without its `0x` prefix
    signature: String,
    signer: Address,
    keypair: EphemeralKeypair,
    contract_addresses: Vec<Address>,
    start_timestamp: u64,
    duration_days: u64,
}

impl SignedAuthorization {
    #[must_use]
    pub fn new(
        typed_data: TypedData,
        signature: &str,
        signer: Address,
        keypair: EphemeralKeypair,
        contract_addresses: Vec<Address>,
        start_timestamp: u64,
        duration_days: u64,
    ) -> Self {
        Self {
            typed_data,
            signature: strip_hex_prefix(signature).to_string(),
            signer,
            keypair,
            contract_addresses,
            start_timestamp,
            duration_days,
        }
    }

    #[must_use]
    pub const fn typed_data(&self) -> &TypedData {
        &self.typed_data
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[must_use]
    pub const fn signer(&self) -> Address {
        self.signer
    }

    #[must_use]
    pub const fn keypair(&self) -> &EphemeralKeypair {
        &self.keypair
    }

    #[must_use]
    pub fn contract_addresses(&self) -> &[Address] {
        &self.contract_addresses
    }

    #[must_use]
    pub const fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    #[must_use]
    pub const fn duration_days(&self) -> u64 {
        self.duration_days
    }

    /// First unix second at which the authorization is no longer valid
    #[must_use]
    pub const fn expires_at(&self) -> u64 {
        self.start_timestamp
            .saturating_add(self.duration_days.saturating_mul(SECONDS_PER_DAY))
    }

    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at()
    }

    /// Whether the authorization is scoped to `contract_address`
    #[must_use]
    pub fn covers(&self, contract_address: &Address) -> bool {
        self.contract_addresses.contains(contract_address)
    }
}
