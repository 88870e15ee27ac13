use std::{collections::HashMap, fmt, str::FromStr};

use ethers::{
    abi::{Function, Token},
    types::{Address, Bytes, U256},
};
use fhe_bridge_utils::encoding::to_prefixed_hex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Size of a ciphertext handle in bytes
pub const HANDLE_SIZE: usize = 32;

/// Length of a handle rendered as `0x`-prefixed hex
pub const HANDLE_HEX_LENGTH: usize = 2 + 2 * HANDLE_SIZE;

/// Opaque 32-byte reference to an encrypted value held by the coprocessor.
///
/// The textual form is always `0x` followed by exactly 64 hex digits. Parsing accepts
/// either case, rendering is lowercase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CiphertextHandle([u8; HANDLE_SIZE]);

impl CiphertextHandle {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HANDLE_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HANDLE_SIZE] {
        &self.0
    }

    /// The handle as a `bytes32` ABI token
    #[must_use]
    pub fn to_token(&self) -> Token {
        Token::FixedBytes(self.0.to_vec())
    }

    /// Builds a handle from a byte slice, which must be exactly 32 bytes long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; HANDLE_SIZE]>::try_from(bytes).ok().map(Self)
    }
}

impl FromStr for CiphertextHandle {
    type Err = HandleParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.len() != HANDLE_HEX_LENGTH {
            return Err(HandleParseError::InvalidLength(value.len()));
        }
        let digits = value
            .strip_prefix("0x")
            .ok_or(HandleParseError::MissingPrefix)?;
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HandleParseError::InvalidHex);
        }
        let mut bytes = [0u8; HANDLE_SIZE];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| HandleParseError::InvalidHex)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_prefixed_hex(self.0))
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({self})")
    }
}

impl Serialize for CiphertextHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CiphertextHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleParseError {
    #[error("Handle must be 66 characters long, got {0}")]
    InvalidLength(usize),
    #[error("Handle must start with `0x`")]
    MissingPrefix,
    #[error("Handle contains non-hex characters")]
    InvalidHex,
}

/// Bit-width of an encrypted unsigned integer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum BitWidth {
    Bool,
    U8,
    U16,
    #[default]
    U32,
    U64,
    U128,
}

impl BitWidth {
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::Bool => 1,
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
            Self::U64 => 64,
            Self::U128 => 128,
        }
    }

    /// Largest plaintext representable at this width
    #[must_use]
    pub const fn max_value(self) -> u128 {
        match self {
            Self::U128 => u128::MAX,
            other => (1u128 << other.bits()) - 1,
        }
    }

    #[must_use]
    pub const fn fits(self, value: u128) -> bool {
        value <= self.max_value()
    }
}

impl TryFrom<u16> for BitWidth {
    type Error = String;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::Bool),
            8 => Ok(Self::U8),
            16 => Ok(Self::U16),
            32 => Ok(Self::U32),
            64 => Ok(Self::U64),
            128 => Ok(Self::U128),
            other => Err(format!("unsupported bit width: {other}")),
        }
    }
}

impl From<BitWidth> for u16 {
    fn from(width: BitWidth) -> Self {
        width.bits()
    }
}

/// A ciphertext handle together with the proof binding it to a (contract, user) pair.
///
/// This is the canonical `{data, proof}` shape produced by the result normalizer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedInput {
    pub ciphertext_handle: CiphertextHandle,
    pub proof: Bytes,
}

impl EncryptedInput {
    /// Positional arguments for the target ledger method: `(bytes32 handle, bytes proof, extra...)`.
    #[must_use]
    pub fn ledger_arguments(&self, extra: Vec<Token>) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(2 + extra.len());
        tokens.push(self.ciphertext_handle.to_token());
        tokens.push(Token::Bytes(self.proof.to_vec()));
        tokens.extend(extra);
        tokens
    }

    /// ABI-encodes a complete call to `function` with this input as its first two arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments do not match the function's parameter list.
    pub fn encode_call(
        &self,
        function: &Function,
        extra: Vec<Token>,
    ) -> Result<Bytes, ethers::abi::Error> {
        function
            .encode_input(&self.ledger_arguments(extra))
            .map(Bytes::from)
    }
}

/// All handles produced by one input session, sharing a single proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedInputBatch {
    pub handles: Vec<CiphertextHandle>,
    pub proof: Bytes,
}

/// A `(handle, contract)` pair submitted for authenticated decryption
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleContractPair {
    pub handle: CiphertextHandle,
    pub contract_address: Address,
}

/// A decrypted value as reported by the coprocessor, before numeric coercion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClearValue {
    Bool(bool),
    Number(u64),
    Text(String),
    /// A raw 32-byte word, only produced locally when opening sealed payloads
    #[serde(skip_deserializing)]
    Word(U256),
    Other(serde_json::Value),
}

impl ClearValue {
    /// Coerces the value to a `u128`.
    ///
    /// Booleans map to 0/1. Text is read as decimal, as a decimal bigint literal with a
    /// trailing `n`, or as `0x` hex. Returns `None` for anything else, and for values
    /// wider than 128 bits.
    #[must_use]
    pub fn to_u128(&self) -> Option<u128> {
        match self {
            Self::Bool(value) => Some(u128::from(*value)),
            Self::Number(value) => Some(u128::from(*value)),
            Self::Text(text) => parse_numeric_text(text),
            Self::Word(word) => (word.bits() <= 128).then(|| word.as_u128()),
            Self::Other(_) => None,
        }
    }
}

fn parse_numeric_text(text: &str) -> Option<u128> {
    let text = text.trim();
    let text = text.strip_suffix('n').unwrap_or(text);
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => u128::from_str_radix(digits, 16).ok(),
        None => text.parse::<u128>().ok(),
    }
}

/// Handle to plaintext mapping returned by authenticated decryption.
///
/// Iteration order is unspecified, look values up by handle.
pub type UserDecryptionResult = HashMap<CiphertextHandle, u128>;

/// Result of a public decryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicDecryptionResult {
    /// Decrypted values, in the order the handles were requested
    pub values: Vec<u128>,
    /// The same values keyed by handle
    pub clear_values: HashMap<CiphertextHandle, u128>,
    /// ABI-encoded cleartexts, suitable for on-chain resolution
    pub cleartexts: Bytes,
    /// Decryption proof to submit alongside the cleartexts
    pub proof: Bytes,
}
