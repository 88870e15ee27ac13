use ethers::types::Address;
use fhe_bridge_utils::{
    encoding::{from_prefixed_hex, to_prefixed_hex},
    SealedBox,
};
use serde::{Deserialize, Serialize};

use crate::types::{CiphertextHandle, HandleContractPair};

/// Every relayer reply is wrapped in a `response` field
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub response: T,
}

/// Error body of a failed relayer request
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUrlResponse {
    /// The relayer's X25519 public key, inputs are sealed to it
    pub public_key: String,
    pub key_id: String,
}

/// A [`SealedBox`] on the wire, every field `0x`-prefixed hex
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedPayload {
    pub ciphertext: String,
    pub nonce: String,
    pub salt: String,
    pub sender_public_key: String,
}

impl From<&SealedBox> for SealedPayload {
    fn from(sealed: &SealedBox) -> Self {
        Self {
            ciphertext: to_prefixed_hex(&sealed.ciphertext),
            nonce: to_prefixed_hex(sealed.nonce),
            salt: to_prefixed_hex(sealed.salt),
            sender_public_key: to_prefixed_hex(sealed.sender_public_key),
        }
    }
}

impl TryFrom<&SealedPayload> for SealedBox {
    type Error = String;

    fn try_from(payload: &SealedPayload) -> Result<Self, Self::Error> {
        fn fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], String> {
            let bytes = from_prefixed_hex(value).map_err(|e| format!("{field}: {e}"))?;
            <[u8; N]>::try_from(bytes.as_slice())
                .map_err(|_| format!("{field}: expected {N} bytes, got {}", bytes.len()))
        }
        Ok(Self {
            ciphertext: from_prefixed_hex(&payload.ciphertext)
                .map_err(|e| format!("ciphertext: {e}"))?,
            nonce: fixed("nonce", &payload.nonce)?,
            salt: fixed("salt", &payload.salt)?,
            sender_public_key: fixed("senderPublicKey", &payload.sender_public_key)?,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputProofBody {
    pub contract_address: Address,
    pub user_address: Address,
    pub contract_chain_id: u64,
    pub bit_widths: Vec<u16>,
    pub sealed: SealedPayload,
    pub extra_data: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestValidity {
    pub start_timestamp: String,
    pub duration_days: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDecryptBody {
    pub handle_contract_pairs: Vec<HandleContractPair>,
    pub request_validity: RequestValidity,
    pub contracts_chain_id: u64,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    /// Signature without its `0x` prefix
    pub signature: String,
    pub public_key: String,
    pub extra_data: String,
}

/// One decrypted value, sealed to the requester's ephemeral key
#[derive(Debug, Deserialize, Serialize)]
pub struct UserDecryptShare {
    pub handle: CiphertextHandle,
    pub payload: SealedPayload,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicDecryptBody {
    pub ciphertext_handles: Vec<CiphertextHandle>,
    pub extra_data: String,
}
