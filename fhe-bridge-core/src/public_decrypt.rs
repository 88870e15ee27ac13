use std::collections::HashMap;

use ethers::{
    abi::{self, Token},
    types::{Bytes, U256},
};
use tracing::{error, info, instrument};

use crate::{
    errors::FheBridgeError,
    instance::FheInstance,
    normalize::{RawClearValues, RawPublicDecryption},
    progress::Step,
    types::{CiphertextHandle, ClearValue, PublicDecryptionResult},
};

/// Validates a list of textual handles for public decryption.
///
/// # Errors
///
/// Returns [`FheBridgeError::InvalidArgument`] if the list is empty or a handle is not
/// `0x` followed by 64 hex digits.
pub fn parse_public_handles<H: AsRef<str>>(
    handles: &[H],
) -> Result<Vec<CiphertextHandle>, FheBridgeError> {
    if handles.is_empty() {
        return Err(FheBridgeError::InvalidArgument(
            "no ciphertext handle to decrypt".to_string(),
        ));
    }
    handles
        .iter()
        .map(|handle| {
            let handle = handle.as_ref();
            handle.parse::<CiphertextHandle>().map_err(|e| {
                FheBridgeError::InvalidArgument(format!("malformed handle `{handle}`: {e}"))
            })
        })
        .collect()
}

/// Picks the value of every requested handle out of a public decryption response, in
/// request order.
///
/// Keyed responses are looked up by handle, positional ones by index, and a scalar is only
/// accepted for a single-handle request.
///
/// # Errors
///
/// Returns [`FheBridgeError::Decryption`] naming the handle whose value is missing or
/// cannot be coerced to a number.
pub fn extract_clear_values(
    handles: &[CiphertextHandle],
    clear_values: &RawClearValues,
) -> Result<Vec<u128>, FheBridgeError> {
    let found: Vec<Option<&ClearValue>> = match clear_values {
        RawClearValues::Keyed(values) => {
            let keyed = values
                .iter()
                .filter_map(|(key, value)| {
                    key.parse::<CiphertextHandle>().ok().map(|handle| (handle, value))
                })
                .collect::<HashMap<_, _>>();
            handles
                .iter()
                .map(|handle| keyed.get(handle).copied())
                .collect()
        }
        RawClearValues::Positional(values) => {
            (0..handles.len()).map(|index| values.get(index)).collect()
        }
        RawClearValues::Scalar(value) => {
            let single = handles.len() == 1;
            handles.iter().map(|_| single.then_some(value)).collect()
        }
    };

    handles
        .iter()
        .zip(found)
        .map(|(handle, value)| {
            let value = value.ok_or_else(|| {
                FheBridgeError::decryption_for_handle(
                    Step::PublicDecrypted,
                    handle,
                    "missing from the coprocessor response",
                )
            })?;
            value.to_u128().ok_or_else(|| {
                FheBridgeError::decryption_for_handle(
                    Step::PublicDecrypted,
                    handle,
                    format!("decrypted value is not numeric: {}", describe(value)),
                )
            })
        })
        .collect()
}

fn describe(value: &ClearValue) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}

/// ABI-encodes decrypted values, one 32-byte unsigned word per value in the given order.
#[must_use]
pub fn encode_cleartexts(values: &[u128]) -> Bytes {
    let tokens = values
        .iter()
        .map(|value| Token::Uint(U256::from(*value)))
        .collect::<Vec<_>>();
    Bytes::from(abi::encode(&tokens))
}

impl FheInstance {
    /// Decrypts publicly decryptable `handles`, given as `0x`-prefixed hex.
    ///
    /// No key holder is involved. Handles are validated before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] for an empty list or a malformed handle,
    /// and otherwise the errors of [`FheInstance::decrypt_public_handles`].
    pub async fn decrypt_public<H: AsRef<str>>(
        &self,
        handles: &[H],
    ) -> Result<PublicDecryptionResult, FheBridgeError> {
        let handles = parse_public_handles(handles)?;
        self.decrypt_public_handles(&handles).await
    }

    /// Decrypts publicly decryptable `handles` and returns their values in request order,
    /// the ABI-encoded cleartexts and the decryption proof.
    ///
    /// When the coprocessor provides the encoded cleartexts they are passed through,
    /// otherwise they are encoded locally from the values.
    ///
    /// # Errors
    ///
    /// Returns [`FheBridgeError::InvalidArgument`] for an empty list,
    /// [`FheBridgeError::Decryption`] if the coprocessor rejects the request, a value is
    /// missing or not numeric, or the proof is missing, and
    /// [`FheBridgeError::ServiceUnavailable`] for transport failures.
    #[instrument(level = "info", skip_all, fields(handles = handles.len()))]
    pub async fn decrypt_public_handles(
        &self,
        handles: &[CiphertextHandle],
    ) -> Result<PublicDecryptionResult, FheBridgeError> {
        if handles.is_empty() {
            return Err(FheBridgeError::InvalidArgument(
                "no ciphertext handle to decrypt".to_string(),
            ));
        }
        let progress = self.progress();
        progress.report(
            Step::PublicDecryptRequested,
            format!("{} handle(s)", handles.len()),
        );

        let result = self
            .coprocessor()
            .public_decrypt(handles)
            .await
            .map_err(|e| FheBridgeError::decryption(Step::PublicDecrypted, e))
            .and_then(|raw| assemble(handles, raw));
        match result {
            Ok(result) => {
                info!(
                    target = "fhe-bridge-public-decrypt",
                    event = "public_decrypted",
                    values = result.values.len(),
                    "Public decryption complete"
                );
                progress.report(
                    Step::PublicDecrypted,
                    format!("{} value(s)", result.values.len()),
                );
                Ok(result)
            }
            Err(e) => {
                error!(
                    target = "fhe-bridge-public-decrypt",
                    event = "public_decrypt_failed",
                    error = %e,
                    "Public decryption failed"
                );
                progress.report(Step::Failed, e.to_string());
                Err(e)
            }
        }
    }
}

fn assemble(
    handles: &[CiphertextHandle],
    raw: RawPublicDecryption,
) -> Result<PublicDecryptionResult, FheBridgeError> {
    let values = extract_clear_values(handles, &raw.clear_values)?;
    let proof = raw
        .decryption_proof
        .filter(|proof| !proof.is_empty())
        .ok_or_else(|| FheBridgeError::Decryption {
            step: Step::PublicDecrypted,
            handle: None,
            reason: "coprocessor response carries no decryption proof".to_string(),
        })?;
    let cleartexts = raw
        .abi_encoded_clear_values
        .filter(|cleartexts| !cleartexts.is_empty())
        .unwrap_or_else(|| encode_cleartexts(&values));
    let clear_values = handles.iter().copied().zip(values.iter().copied()).collect();
    Ok(PublicDecryptionResult {
        values,
        clear_values,
        cleartexts,
        proof,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_utils::{mock_instance, MockCoprocessor};

    const FIRST: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const SECOND: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    fn handles() -> Vec<CiphertextHandle> {
        vec![FIRST.parse().unwrap(), SECOND.parse().unwrap()]
    }

    fn raw(clear_values: serde_json::Value) -> RawClearValues {
        serde_json::from_value(clear_values).unwrap()
    }

    #[test]
    fn test_extract_keyed_values() {
        let upper = format!("0x{}", SECOND[2..].to_uppercase());
        let values = extract_clear_values(
            &handles(),
            &raw(json!({ SECOND: 2, FIRST: "7n", "unrelated": "x" })),
        )
        .unwrap();
        assert_eq!(values, vec![7, 2]);

        let values =
            extract_clear_values(&handles(), &raw(json!({ upper: true, FIRST: "0x10" }))).unwrap();
        assert_eq!(values, vec![16, 1]);
    }

    #[test]
    fn test_extract_positional_and_scalar_values() {
        assert_eq!(
            extract_clear_values(&handles(), &raw(json!(["3", 4]))).unwrap(),
            vec![3, 4]
        );
        assert_eq!(
            extract_clear_values(&handles()[..1], &raw(json!("12n"))).unwrap(),
            vec![12]
        );
        assert!(matches!(
            extract_clear_values(&handles(), &raw(json!(5))),
            Err(FheBridgeError::Decryption { handle: Some(_), .. })
        ));
    }

    #[test]
    fn test_non_numeric_value_names_handle() {
        let error = extract_clear_values(&handles(), &raw(json!([1, "abc"]))).unwrap_err();
        assert!(matches!(
            error,
            FheBridgeError::Decryption { handle: Some(ref handle), .. } if handle == SECOND
        ));

        let error = extract_clear_values(&handles(), &raw(json!({ FIRST: 1 }))).unwrap_err();
        assert!(matches!(
            error,
            FheBridgeError::Decryption { handle: Some(ref handle), .. } if handle == SECOND
        ));
    }

    #[test]
    fn test_encode_cleartexts() {
        let encoded = encode_cleartexts(&[7, 42]);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 7);
        assert_eq!(encoded[63], 42);
        assert!(encoded[..31].iter().all(|byte| *byte == 0));
        assert!(encode_cleartexts(&[]).is_empty());
    }

    #[test]
    fn test_parse_public_handles() {
        let none: [&str; 0] = [];
        assert!(matches!(
            parse_public_handles(&none),
            Err(FheBridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_public_handles(&[FIRST, "0xabc"]),
            Err(FheBridgeError::InvalidArgument(message)) if message.contains("0xabc")
        ));
        assert_eq!(parse_public_handles(&[FIRST, SECOND]).unwrap(), handles());
    }

    #[tokio::test]
    async fn test_public_decrypt_encodes_missing_blob() {
        let coprocessor = MockCoprocessor::new();
        let instance = mock_instance(coprocessor.clone());
        let mut handles = Vec::new();
        for value in [7u128, 8] {
            let input = instance
                .encrypt(Default::default(), Default::default(), value, None)
                .await
                .unwrap();
            coprocessor.mark_public(input.ciphertext_handle);
            handles.push(input.ciphertext_handle.to_string());
        }
        let result = instance.decrypt_public(&handles).await.unwrap();
        assert_eq!(result.values, vec![7, 8]);
        assert_eq!(result.cleartexts, encode_cleartexts(&[7, 8]));
        assert!(!result.proof.is_empty());
        assert_eq!(result.clear_values.len(), 2);
    }

    #[tokio::test]
    async fn test_public_decrypt_passes_blob_through() {
        let coprocessor = MockCoprocessor::new().with_public_response(json!({
            "clearValues": { FIRST: 1 },
            "abiEncodedClearValues": "0xabcd",
            "decryptionProof": "0x01",
        }));
        let instance = mock_instance(coprocessor);
        let result = instance.decrypt_public(&[FIRST]).await.unwrap();
        assert_eq!(result.cleartexts.to_vec(), vec![0xab, 0xcd]);
    }

    #[tokio::test]
    async fn test_missing_proof_is_fatal() {
        let coprocessor = MockCoprocessor::new().with_public_response(json!({
            "clearValues": { FIRST: 1 },
        }));
        let instance = mock_instance(coprocessor);
        assert!(matches!(
            instance.decrypt_public(&[FIRST]).await,
            Err(FheBridgeError::Decryption { handle: None, .. })
        ));
    }
}
