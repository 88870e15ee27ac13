use std::fmt;

use fhe_bridge_utils::{
    constants::X25519_PUBLIC_KEY_SIZE,
    encoding::{from_prefixed_hex, to_prefixed_hex},
    encryption, SealedBox,
};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

type Result<T> = std::result::Result<T, KeypairError>;

/// An ephemeral X25519 keypair for one authenticated decryption session.
///
/// The coprocessor seals every decrypted value to the public key, the private key opens
/// them locally. Neither key is ever persisted, and the private key never leaves the
/// process.
#[derive(Clone)]
pub struct EphemeralKeypair {
    /// The X25519 static secret, dropped with the session
    secret_key: StaticSecret,
}

impl EphemeralKeypair {
    /// Generates a fresh random keypair
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let secret_key = StaticSecret::random_from_rng(&mut rng);
        Self { secret_key }
    }

    /// Restores a keypair from its `0x`-prefixed hex private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not hex or is not 32 bytes long.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let bytes = from_prefixed_hex(private_key)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| KeypairError::InvalidKeyLength(bytes.len()))?;
        Ok(Self {
            secret_key: StaticSecret::from(bytes),
        })
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret_key)
    }

    /// The public key as `0x`-prefixed hex, as it appears in the authorization message
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        to_prefixed_hex(self.public_key().as_bytes())
    }

    /// The private key as `0x`-prefixed hex
    #[must_use]
    pub fn private_key_hex(&self) -> String {
        to_prefixed_hex(self.secret_key.as_bytes())
    }

    /// Opens a payload the coprocessor sealed to this keypair.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload was sealed to another key or was tampered with.
    pub fn open(&self, sealed: &SealedBox) -> Result<Vec<u8>> {
        Ok(encryption::open(&self.secret_key, sealed)?)
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Parses a `0x`-prefixed hex X25519 public key.
///
/// # Errors
///
/// Returns an error if the value is not hex or is not 32 bytes long.
pub fn parse_public_key(value: &str) -> Result<PublicKey> {
    let bytes = from_prefixed_hex(value)?;
    let bytes: [u8; X25519_PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| KeypairError::InvalidKeyLength(bytes.len()))?;
    Ok(PublicKey::from(bytes))
}

#[derive(Debug, Error)]
pub enum KeypairError {
    #[error("Invalid hex encoding: `{0}`")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Invalid key length: `{0}`")]
    InvalidKeyLength(usize),
    #[error("Failed to open sealed payload: `{0}`")]
    Open(#[from] encryption::Error),
}
