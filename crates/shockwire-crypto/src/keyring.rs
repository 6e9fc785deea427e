//! Local keyring -- X25519 static secrets keyed by session identifier.
//!
//! The key-exchange flow registers a secret here and hands the public half to
//! the node; inbound envelopes are unsealed with the secret for the current
//! session. Secrets never leave the keyring.

use std::collections::HashMap;
use std::sync::RwLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::Rng;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

use crate::CryptoError;

/// Session identifiers are this many random bytes, hex encoded.
const SESSION_ID_BYTES: usize = 16;

#[derive(Default)]
pub struct Keyring {
    sessions: RwLock<HashMap<String, StaticSecret>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session secret. Returns (session_id, public key base64).
    pub fn generate_session(&self) -> (String, String) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = BASE64.encode(PublicKey::from(&secret).as_bytes());

        let id_bytes: [u8; SESSION_ID_BYTES] = OsRng.gen();
        let session_id = hex::encode(id_bytes);

        self.write().insert(session_id.clone(), secret);
        tracing::debug!(session = %session_id, "keyring: session generated");
        (session_id, public)
    }

    /// Register an existing secret (base64 of 32 raw bytes) under a session id.
    pub fn insert(&self, session_id: &str, secret_b64: &str) -> Result<String, CryptoError> {
        let bytes = decode_key(secret_b64)?;
        let secret = StaticSecret::from(bytes);
        let public = BASE64.encode(PublicKey::from(&secret).as_bytes());
        self.write().insert(session_id.to_string(), secret);
        Ok(public)
    }

    /// Public key (base64) for a session.
    pub fn public_key(&self, session_id: &str) -> Option<String> {
        self.read()
            .get(session_id)
            .map(|s| BASE64.encode(PublicKey::from(s).as_bytes()))
    }

    /// Forget a session. Returns true if it existed.
    pub fn remove(&self, session_id: &str) -> bool {
        self.write().remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    /// X25519 agreement between the session secret and a peer public key.
    pub(crate) fn agree(
        &self,
        session_id: &str,
        peer_public: &PublicKey,
    ) -> Result<SharedSecret, CryptoError> {
        let sessions = self.read();
        let secret = sessions
            .get(session_id)
            .ok_or_else(|| CryptoError::UnknownSession(session_id.to_string()))?;
        Ok(secret.diffie_hellman(peer_public))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StaticSecret>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StaticSecret>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decode a base64 32-byte X25519 key.
pub(crate) fn decode_key(b64: &str) -> Result<[u8; 32], CryptoError> {
    let raw = BASE64.decode(b64)?;
    raw.as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", raw.len())))
}
