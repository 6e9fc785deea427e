//! Wire message types.
//!
//! Every frame is a named event with an opaque JSON body. Command bodies are
//! `{ token, ...fields, uuid? }`; replies echo the request as `origBody`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventName;

// ============================================================================
// Frame
// ============================================================================

/// One named event on the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Bootstrap frame opening a link.
    pub fn hello(device_id: &str) -> Self {
        let mut data = serde_json::Map::new();
        data.insert(crate::DEVICE_ID_KEY.into(), Value::String(device_id.into()));
        Self::new(EventName::Hello.as_str(), Value::Object(data))
    }

    pub fn is(&self, event: EventName) -> bool {
        self.event == event.as_str()
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Reply to a correlated command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub ok: bool,
    #[serde(default)]
    pub msg: Value,
    #[serde(rename = "origBody", default)]
    pub orig_body: Value,
}

impl Emission {
    /// Correlation token echoed in the original body, if any.
    pub fn correlation(&self, field: &str) -> Option<&str> {
        self.orig_body.get(field).and_then(Value::as_str)
    }

    /// Remote-supplied message as text. Non-string messages are rendered as JSON.
    pub fn message(&self) -> Option<String> {
        match &self.msg {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

// ============================================================================
// Encryption envelope
// ============================================================================

/// Sealed wire representation of a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Symmetric key sealed under the remote public key (base64).
    #[serde(rename = "encryptedKey")]
    pub encrypted_key: String,
    /// AES-256-GCM ciphertext with appended tag (base64).
    #[serde(rename = "encryptedData")]
    pub encrypted_data: String,
    /// 12-byte nonce (base64).
    pub iv: String,
}

impl Envelope {
    /// Whether a JSON value carries the sealed-key marker.
    /// Frames without it are plaintext/bootstrap.
    pub fn is_sealed(value: &Value) -> bool {
        value
            .get("encryptedKey")
            .is_some_and(|k| !k.is_null())
    }
}
