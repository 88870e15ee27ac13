/// Size of an AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the HKDF salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of a X25519 public key in bytes
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of a single ABI word, and of a sealed cleartext value
pub const WORD_SIZE: usize = 32;
