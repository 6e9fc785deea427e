//! Envelope codec -- seals outbound payloads, opens inbound ones.
//!
//! Key material is read from the connection state on every call and never
//! cached here. Empty payloads and allow-listed (plaintext) events pass
//! through untouched; inbound frames without the sealed-key marker are
//! treated as bootstrap plaintext.

use std::sync::Arc;

use serde_json::Value;
use shockwire_protocol::{encryption_for, Encryption, Envelope};

use crate::sealed::EnvelopeCipher;
use crate::{key_fingerprint, CryptoError};

/// Read-only view of the negotiated key material.
pub trait KeyMaterial: Send + Sync {
    /// Remote endpoint's public key (base64), once exchanged.
    fn remote_public_key(&self) -> Option<String>;
    /// Local session identifier used to unseal inbound keys.
    fn session_id(&self) -> Option<String>;
}

#[derive(Clone)]
pub struct EnvelopeCodec {
    cipher: Arc<dyn EnvelopeCipher>,
    keys: Arc<dyn KeyMaterial>,
    bypass: bool,
}

/// Whether this build may honour the bypass flag.
pub const BYPASS_ALLOWED: bool = cfg!(any(debug_assertions, feature = "insecure-bypass"));

impl EnvelopeCodec {
    pub fn new(cipher: Arc<dyn EnvelopeCipher>, keys: Arc<dyn KeyMaterial>) -> Self {
        Self {
            cipher,
            keys,
            bypass: false,
        }
    }

    /// Request the diagnostic bypass. Ignored unless `BYPASS_ALLOWED`.
    pub fn with_bypass(mut self, requested: bool) -> Self {
        if requested && !BYPASS_ALLOWED {
            tracing::warn!("codec: encryption bypass requested in a release build, ignoring");
        }
        self.bypass = requested && BYPASS_ALLOWED;
        if self.bypass {
            tracing::warn!("codec: ENCRYPTION BYPASS ACTIVE -- payloads travel in plaintext");
        }
        self
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Encrypt a payload for the remote endpoint.
    ///
    /// Empty payloads are returned unchanged. Non-empty payloads without an
    /// established remote key fail with `NoKeyExchange`.
    pub fn encrypt(&self, payload: Value) -> Result<Value, CryptoError> {
        if self.bypass || is_empty(&payload) {
            return Ok(payload);
        }

        let remote = self.keys.remote_public_key().ok_or(CryptoError::NoKeyExchange)?;

        let plaintext = serde_json::to_vec(&payload)?;
        let envelope = self.cipher.encrypt(&plaintext, &remote)?;
        tracing::trace!(
            remote = %key_fingerprint(&remote),
            bytes = plaintext.len(),
            "codec: payload sealed"
        );
        Ok(serde_json::to_value(envelope)?)
    }

    /// Decrypt an inbound payload. Frames without the sealed-key marker are
    /// returned unchanged.
    pub fn decrypt(&self, data: Value) -> Result<Value, CryptoError> {
        if self.bypass || !Envelope::is_sealed(&data) {
            return Ok(data);
        }

        let envelope: Envelope = serde_json::from_value(data)?;
        let session = self.keys.session_id().ok_or(CryptoError::MissingSession)?;

        let key = self.cipher.decrypt_key(&envelope.encrypted_key, &session)?;
        let plaintext = self
            .cipher
            .decrypt(&envelope.encrypted_data, &key, &envelope.iv)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Encrypt for a named event, honouring the plaintext allow-list.
    pub fn seal(&self, event: &str, payload: Value) -> Result<Value, CryptoError> {
        match encryption_for(event) {
            Encryption::Plaintext => Ok(payload),
            Encryption::Sealed => self.encrypt(payload),
        }
    }

    /// Decrypt for a named event, honouring the plaintext allow-list.
    pub fn open(&self, event: &str, data: Value) -> Result<Value, CryptoError> {
        match encryption_for(event) {
            Encryption::Plaintext => Ok(data),
            Encryption::Sealed => self.decrypt(data),
        }
    }
}

/// Null, empty object, empty array or empty string.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
