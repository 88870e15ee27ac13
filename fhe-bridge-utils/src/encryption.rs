use aes_gcm::{aead::Aead, Aes256Gcm, Error as AesError, KeyInit, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

use crate::constants::{NONCE_SIZE, SALT_SIZE, X25519_PUBLIC_KEY_SIZE};

type Result<T> = std::result::Result<T, Error>;

/// A payload sealed to a X25519 recipient key.
///
/// The sender generates a one-off X25519 secret, derives a symmetric key from the
/// Diffie-Hellman shared secret with HKDF-SHA256 (keyed by `salt`) and encrypts the
/// payload with AES-256-GCM. Everything the recipient needs to open it, apart from its
/// own secret, travels in this struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBox {
    /// The AES-GCM ciphertext, tag included
    pub ciphertext: Vec<u8>,
    /// Nonce used for the AES-GCM encryption
    pub nonce: [u8; NONCE_SIZE],
    /// Salt used for the HKDF key derivation
    pub salt: [u8; SALT_SIZE],
    /// Public key of the sender's one-off X25519 secret
    pub sender_public_key: [u8; X25519_PUBLIC_KEY_SIZE],
}

/// Seals `plaintext` to `recipient_public_key`.
///
/// # Errors
///
/// Returns an error if key expansion or encryption fails.
pub fn seal(recipient_public_key: &PublicKey, plaintext: &[u8]) -> Result<SealedBox> {
    let mut rng = rand::thread_rng();
    let sender_secret = StaticSecret::random_from_rng(&mut rng);
    let sender_public_key = PublicKey::from(&sender_secret);
    let shared_secret = sender_secret.diffie_hellman(recipient_public_key);
    let salt = rand::random::<[u8; SALT_SIZE]>();
    let (ciphertext, nonce) = encrypt_plaintext(plaintext, &shared_secret, &salt, None)?;
    Ok(SealedBox {
        ciphertext,
        nonce,
        salt,
        sender_public_key: sender_public_key.to_bytes(),
    })
}

/// Opens a [`SealedBox`] with the recipient's secret.
///
/// # Errors
///
/// Returns an error if key expansion fails or the ciphertext does not authenticate.
pub fn open(recipient_secret: &StaticSecret, sealed: &SealedBox) -> Result<Vec<u8>> {
    let sender_public_key = PublicKey::from(sealed.sender_public_key);
    let shared_secret = recipient_secret.diffie_hellman(&sender_public_key);
    decrypt_ciphertext(&shared_secret, &sealed.ciphertext, &sealed.salt, &sealed.nonce)
}

/// Decrypts a ciphertext using the provided shared secret and nonce.
///
/// # Errors
/// Returns an error if:
/// - The nonce has the wrong length
/// - Key derivation fails
/// - Decryption fails due to invalid data or parameters
pub fn decrypt_ciphertext(
    shared_secret: &SharedSecret,
    ciphertext: &[u8],
    salt: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(Error::InvalidNonceLength(nonce.len()));
    }
    let cipher = derive_cipher(shared_secret, salt)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(Error::DecryptionFailed)
}

/// Encrypts plaintext using the provided shared secret.
///
/// # Returns
/// Tuple of (encrypted data, nonce used)
///
/// # Errors
/// Returns an error if:
/// - Key derivation fails
/// - Encryption operation fails
pub fn encrypt_plaintext(
    plaintext: &[u8],
    shared_secret: &SharedSecret,
    salt: &[u8],
    nonce: Option<[u8; NONCE_SIZE]>,
) -> Result<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = derive_cipher(shared_secret, salt)?;
    let nonce = nonce.unwrap_or_else(rand::random::<[u8; NONCE_SIZE]>);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(Error::EncryptionFailed)?;

    Ok((ciphertext, nonce))
}

fn derive_cipher(shared_secret: &SharedSecret, salt: &[u8]) -> Result<Aes256Gcm> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret.as_bytes());
    let mut symmetric_key = [0u8; 32];
    hkdf.expand(b"", &mut symmetric_key)
        .map_err(Error::KeyExpansionFailed)?;
    Ok(Aes256Gcm::new(&symmetric_key.into()))
}

/// Errors that can occur during sealing and opening
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to decrypt ciphertext, with error: `{0}`")]
    DecryptionFailed(AesError),
    #[error("Failed to encrypt plaintext, with error: `{0}`")]
    EncryptionFailed(AesError),
    #[error("Failed to expand key, with error: `{0}`")]
    KeyExpansionFailed(hkdf::InvalidLength),
    #[error("Invalid nonce length: `{0}`")]
    InvalidNonceLength(usize),
}
