//! Shockwire Crypto -- envelope codec, sealed session keys, local keyring.
//!
//! Payload encryption: AES-256-GCM under a fresh per-message key.
//! Key sealing: X25519 (ephemeral -> remote static) + HKDF-SHA256 -> AES-256-GCM.
//! Envelope JSON: `{ encryptedKey, encryptedData, iv }`, all base64.

use sha2::{Digest, Sha256};

pub mod envelope;
pub mod keyring;
pub mod sealed;

// Re-exports
pub use envelope::{EnvelopeCodec, KeyMaterial};
pub use keyring::Keyring;
pub use sealed::{EnvelopeCipher, SealedBoxCipher, SymmetricKey};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no key exchange: remote public key not established")]
    NoKeyExchange,
    #[error("no local session identifier to unseal with")]
    MissingSession,
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,
    #[error("base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// SHA-256 hash of data, returned as hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Short loggable fingerprint of a public key (first 16 hex chars of SHA-256).
pub fn key_fingerprint(public_key: &str) -> String {
    let mut hash = sha256_hex(public_key.as_bytes());
    hash.truncate(16);
    hash
}
