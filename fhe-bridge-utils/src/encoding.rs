use crate::constants::WORD_SIZE;

/// Hex-encodes `bytes` with a leading `0x`.
#[must_use]
pub fn to_prefixed_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes a hex string, with or without a leading `0x`.
///
/// # Errors
///
/// Returns an error if the remaining characters are not valid hex or have odd length.
pub fn from_prefixed_hex(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let stripped = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    hex::decode(stripped)
}

/// Left-pads a `u128` into a 32-byte big-endian word.
#[must_use]
pub fn u128_to_word(value: u128) -> [u8; WORD_SIZE] {
    let mut word = [0u8; WORD_SIZE];
    word[WORD_SIZE - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Reads a 32-byte big-endian word back into a `u128`.
///
/// Returns `None` when any of the upper 16 bytes is set.
#[must_use]
pub fn word_to_u128(word: &[u8]) -> Option<u128> {
    if word.len() != WORD_SIZE || word[..WORD_SIZE - 16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[WORD_SIZE - 16..]);
    Some(u128::from_be_bytes(low))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_hex() {
        assert_eq!(to_prefixed_hex([0xde, 0xad]), "0xdead");
        assert_eq!(from_prefixed_hex("0xDEAD").unwrap(), vec![0xde, 0xad]);
        assert_eq!(from_prefixed_hex("beef").unwrap(), vec![0xbe, 0xef]);
        assert!(from_prefixed_hex("0xabc").is_err());
    }

    #[test]
    fn test_words() {
        let word = u128_to_word(42);
        assert_eq!(word[31], 42);
        assert!(word[..31].iter().all(|b| *b == 0));
        assert_eq!(word_to_u128(&word), Some(42));
        assert_eq!(word_to_u128(&u128_to_word(u128::MAX)), Some(u128::MAX));

        let mut wide = [0u8; WORD_SIZE];
        wide[0] = 1;
        assert_eq!(word_to_u128(&wide), None);
        assert_eq!(word_to_u128(&[0u8; 31]), None);
    }
}
