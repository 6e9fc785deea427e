//! External collaborators -- credential cache, endpoint cache, connection
//! state store, contact cache, broadcast sink.
//!
//! The channel only talks to these traits. `MemoryStore` implements all of
//! them for the CLI and tests.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shockwire_crypto::KeyMaterial;
use shockwire_protocol::EventName;

// ============================================================================
// Traits
// ============================================================================

/// Cached auth session.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Auth token, or None if no session is cached.
    async fn token(&self) -> Option<String>;
}

/// Cached node endpoint.
#[async_trait]
pub trait EndpointCache: Send + Sync {
    async fn node_url(&self) -> Option<String>;
}

/// Channel state transitions pushed to the connection store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNotice {
    Up,
    Down { reason: String },
}

/// Connection-state store. Written on every up/down transition, read for
/// key material and the device identifier.
pub trait ConnectionStore: Send + Sync {
    fn device_id(&self) -> String;
    fn dispatch(&self, notice: ChannelNotice);
}

/// Local cache of chats and sent handshake requests.
pub trait ContactCache: Send + Sync {
    fn chats(&self) -> Vec<Chat>;
    fn set_chats(&self, chats: Vec<Chat>);
    fn sent_requests(&self) -> Vec<SentRequest>;
    fn set_sent_requests(&self, requests: Vec<SentRequest>);
}

/// Receiver for broadcast (non-reply) events.
pub trait EventSink: Send + Sync {
    fn on_broadcast(&self, event: &str, data: Value);
}

// ============================================================================
// Contact records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub recipient_public_key: String,
    #[serde(default)]
    pub recipient_display_name: Option<String>,
    #[serde(default)]
    pub recipient_avatar: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentRequest {
    pub id: String,
    #[serde(default)]
    pub recipient_avatar: Option<String>,
    #[serde(default)]
    pub recipient_changed_request_address: bool,
    #[serde(default)]
    pub recipient_display_name: Option<String>,
    pub recipient_public_key: String,
    #[serde(default)]
    pub timestamp: u64,
}

// ============================================================================
// Collaborator bundle
// ============================================================================

/// Everything the channel and command surface consume.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialCache>,
    pub endpoint: Arc<dyn EndpointCache>,
    pub connection: Arc<dyn ConnectionStore>,
    pub keys: Arc<dyn KeyMaterial>,
    pub contacts: Arc<dyn ContactCache>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    /// Wire every role to one in-memory store.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            credentials: store.clone(),
            endpoint: store.clone(),
            connection: store.clone(),
            keys: store.clone(),
            contacts: store.clone(),
            events: store,
        }
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    token: Option<String>,
    node_url: Option<String>,
    device_id: String,
    remote_public_key: Option<String>,
    session_id: Option<String>,
    chats: Vec<Chat>,
    sent_requests: Vec<SentRequest>,
    notices: Vec<ChannelNotice>,
    broadcasts: Vec<(String, Value)>,
}

/// In-memory store implementing every collaborator role.
///
/// Broadcast snapshots for `ON_CHATS` and `ON_SENT_REQUESTS` replace the
/// cached lists, so server pushes reconcile optimistic mutations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(device_id: impl Into<String>) -> Self {
        let store = Self::default();
        store.write().device_id = device_id.into();
        store
    }

    pub fn set_token(&self, token: Option<String>) {
        self.write().token = token;
    }

    pub fn set_node_url(&self, url: Option<String>) {
        self.write().node_url = url;
    }

    pub fn set_remote_public_key(&self, key: Option<String>) {
        self.write().remote_public_key = key;
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        self.write().session_id = session_id;
    }

    /// Up/down notices dispatched so far, oldest first.
    pub fn notices(&self) -> Vec<ChannelNotice> {
        self.read().notices.clone()
    }

    /// Broadcasts received so far, oldest first.
    pub fn broadcasts(&self) -> Vec<(String, Value)> {
        self.read().broadcasts.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialCache for MemoryStore {
    async fn token(&self) -> Option<String> {
        self.read().token.clone()
    }
}

#[async_trait]
impl EndpointCache for MemoryStore {
    async fn node_url(&self) -> Option<String> {
        self.read().node_url.clone()
    }
}

impl KeyMaterial for MemoryStore {
    fn remote_public_key(&self) -> Option<String> {
        self.read().remote_public_key.clone()
    }

    fn session_id(&self) -> Option<String> {
        self.read().session_id.clone()
    }
}

impl ConnectionStore for MemoryStore {
    fn device_id(&self) -> String {
        self.read().device_id.clone()
    }

    fn dispatch(&self, notice: ChannelNotice) {
        self.write().notices.push(notice);
    }
}

impl ContactCache for MemoryStore {
    fn chats(&self) -> Vec<Chat> {
        self.read().chats.clone()
    }

    fn set_chats(&self, chats: Vec<Chat>) {
        self.write().chats = chats;
    }

    fn sent_requests(&self) -> Vec<SentRequest> {
        self.read().sent_requests.clone()
    }

    fn set_sent_requests(&self, requests: Vec<SentRequest>) {
        self.write().sent_requests = requests;
    }
}

impl EventSink for MemoryStore {
    fn on_broadcast(&self, event: &str, data: Value) {
        match EventName::parse(event) {
            Some(EventName::OnChats) => match serde_json::from_value::<Vec<Chat>>(data.clone()) {
                Ok(chats) => self.set_chats(chats),
                Err(e) => tracing::warn!(event, "store: malformed chats snapshot: {e}"),
            },
            Some(EventName::OnSentRequests) => {
                match serde_json::from_value::<Vec<SentRequest>>(data.clone()) {
                    Ok(requests) => self.set_sent_requests(requests),
                    Err(e) => tracing::warn!(event, "store: malformed sent requests snapshot: {e}"),
                }
            }
            _ => {}
        }
        self.write().broadcasts.push((event.to_string(), data));
    }
}
