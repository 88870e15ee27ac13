//! Reconciles the result shapes returned by the coprocessor client.
//!
//! Depending on its version and runtime, the coprocessor reports a finalized input either
//! as an ordered list of handles with a separate proof, as a flat `{data, proof}` object,
//! or as something else entirely. Each case is an explicit variant of
//! [`RawEncryptionResult`] and [`normalize`] matches over all of them.

use std::collections::HashMap;

use ethers::types::Bytes;
use fhe_bridge_utils::encoding::from_prefixed_hex;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    errors::FheBridgeError,
    types::{CiphertextHandle, ClearValue, EncryptedInput, EncryptedInputBatch},
};

/// Longest excerpt of an unrecognized response kept in error messages
const MAX_EXCERPT_LENGTH: usize = 96;

/// Raw result of finalizing an input-construction session.
#[derive(Clone, Debug, PartialEq)]
pub enum RawEncryptionResult {
    /// An ordered list of handles plus a separate input proof
    HandleArray {
        handles: Vec<CiphertextHandle>,
        input_proof: Bytes,
    },
    /// Distinct data and proof fields
    Direct { data: CiphertextHandle, proof: Bytes },
    /// Anything else
    Scalar(Value),
}

impl RawEncryptionResult {
    /// Classifies a JSON reply, first match wins:
    /// 1. a non-empty `handles` array plus an `inputProof` (or `proof`) field,
    /// 2. a `data` (or `ciphertextHandle`) field plus a `proof` field,
    /// 3. anything else.
    ///
    /// An empty proof counts as absent.
    ///
    /// Handles may be hex strings or arrays of 32 byte values, proofs hex strings or byte
    /// arrays.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        if let Some(object) = value.as_object() {
            let handles = object
                .get("handles")
                .and_then(Value::as_array)
                .and_then(|handles| {
                    handles
                        .iter()
                        .map(parse_handle_value)
                        .collect::<Option<Vec<_>>>()
                })
                .filter(|handles| !handles.is_empty());
            let input_proof = object
                .get("inputProof")
                .or_else(|| object.get("proof"))
                .and_then(parse_bytes_value)
                .filter(|proof| !proof.is_empty());
            if let (Some(handles), Some(input_proof)) = (handles, input_proof) {
                return Self::HandleArray {
                    handles,
                    input_proof,
                };
            }

            let data = object
                .get("data")
                .or_else(|| object.get("ciphertextHandle"))
                .and_then(parse_handle_value);
            let proof = object
                .get("proof")
                .and_then(parse_bytes_value)
                .filter(|proof| !proof.is_empty());
            if let (Some(data), Some(proof)) = (data, proof) {
                return Self::Direct { data, proof };
            }
        }
        Self::Scalar(value)
    }
}

impl From<EncryptedInput> for RawEncryptionResult {
    fn from(input: EncryptedInput) -> Self {
        Self::Direct {
            data: input.ciphertext_handle,
            proof: input.proof,
        }
    }
}

/// Reduces a raw encryption result to the canonical `{ciphertext_handle, proof}` shape.
///
/// Normalizing an already normalized input, via [`RawEncryptionResult::Direct`], returns it
/// unchanged.
///
/// # Errors
///
/// Returns [`FheBridgeError::UnrecognizedResponseShape`] for [`RawEncryptionResult::Scalar`],
/// for an empty handle list and for an empty proof.
pub fn normalize(raw: &RawEncryptionResult) -> Result<EncryptedInput, FheBridgeError> {
    match raw {
        RawEncryptionResult::HandleArray {
            handles,
            input_proof,
        } => {
            let handle = handles.first().ok_or_else(|| {
                FheBridgeError::UnrecognizedResponseShape("handle list is empty".to_string())
            })?;
            with_proof(*handle, input_proof)
        }
        RawEncryptionResult::Direct { data, proof } => with_proof(*data, proof),
        RawEncryptionResult::Scalar(value) => Err(FheBridgeError::UnrecognizedResponseShape(
            excerpt(value),
        )),
    }
}

fn with_proof(handle: CiphertextHandle, proof: &Bytes) -> Result<EncryptedInput, FheBridgeError> {
    if proof.is_empty() {
        return Err(FheBridgeError::UnrecognizedResponseShape(
            "input proof is empty".to_string(),
        ));
    }
    Ok(EncryptedInput {
        ciphertext_handle: handle,
        proof: proof.clone(),
    })
}

/// Like [`normalize`], but keeps every handle of a multi-value session.
///
/// # Errors
///
/// Same as [`normalize`].
pub fn normalize_batch(raw: &RawEncryptionResult) -> Result<EncryptedInputBatch, FheBridgeError> {
    match raw {
        RawEncryptionResult::HandleArray {
            handles,
            input_proof,
        } if !handles.is_empty() && !input_proof.is_empty() => Ok(EncryptedInputBatch {
            handles: handles.clone(),
            proof: input_proof.clone(),
        }),
        other => normalize(other).map(|input| EncryptedInputBatch {
            handles: vec![input.ciphertext_handle],
            proof: input.proof,
        }),
    }
}

/// Raw result of a public decryption.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPublicDecryption {
    pub clear_values: RawClearValues,
    #[serde(default)]
    pub abi_encoded_clear_values: Option<Bytes>,
    #[serde(default)]
    pub decryption_proof: Option<Bytes>,
}

/// The shapes in which public decryption reports its values.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawClearValues {
    /// Values keyed by handle
    Keyed(HashMap<String, ClearValue>),
    /// Values in request order
    Positional(Vec<ClearValue>),
    /// A single value, for a one-handle request
    Scalar(ClearValue),
}

fn parse_handle_value(value: &Value) -> Option<CiphertextHandle> {
    match value {
        Value::String(text) => text.parse().ok(),
        Value::Array(_) => parse_bytes_value(value).and_then(|bytes| CiphertextHandle::from_slice(&bytes)),
        _ => None,
    }
}

fn parse_bytes_value(value: &Value) -> Option<Bytes> {
    match value {
        Value::String(text) => from_prefixed_hex(text).ok().map(Bytes::from),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|byte| u8::try_from(byte).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(Bytes::from),
        _ => None,
    }
}

fn excerpt(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() <= MAX_EXCERPT_LENGTH {
        return rendered;
    }
    let mut end = MAX_EXCERPT_LENGTH;
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &rendered[..end])
}
