//! Command surface -- high-level operations on the node.
//!
//! Every command checks the channel is connected before touching the cache
//! or the wire. Correlated commands go through the `Correlator`; commands
//! with an optimistic cache mutation go through `speculate`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};
use shockwire_protocol::{EventName, CORRELATION_FIELD};

use crate::channel::ChannelHandle;
use crate::correlator::{accept, new_token, Correlator, ReplyMode};
use crate::error::ChannelError;
use crate::speculative::speculate;
use crate::store::{Chat, ContactCache, CredentialCache, SentRequest};

#[derive(Clone)]
pub struct CommandSurface {
    channel: ChannelHandle,
    correlator: Correlator,
    credentials: Arc<dyn CredentialCache>,
    contacts: Arc<dyn ContactCache>,
    reply_settle: Duration,
    sent_requests_refresh: Duration,
    /// Serialises read-modify-write passes over the contact cache.
    cache_lock: Arc<Mutex<()>>,
}

/// Placeholder name for a peer we know nothing about yet.
pub fn default_display_name(public_key: &str) -> String {
    let prefix: String = public_key.chars().take(8).collect();
    format!("anon{prefix}")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Build a JSON object payload from key/value pairs.
fn payload<const N: usize>(fields: [(&str, Value); N]) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl CommandSurface {
    pub fn new(
        channel: ChannelHandle,
        credentials: Arc<dyn CredentialCache>,
        contacts: Arc<dyn ContactCache>,
        reply_settle: Duration,
        sent_requests_refresh: Duration,
    ) -> Self {
        Self {
            correlator: Correlator::new(channel.clone()),
            channel,
            credentials,
            contacts,
            reply_settle,
            sent_requests_refresh,
            cache_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.channel.is_connected() {
            Ok(())
        } else {
            Err(ChannelError::NotConnected)
        }
    }

    fn cache_guard(&self) -> MutexGuard<'_, ()> {
        self.cache_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn token(&self) -> Result<String, ChannelError> {
        self.credentials
            .token()
            .await
            .ok_or(ChannelError::NoCredentials)
    }

    async fn emit(&self, event: EventName, body: Map<String, Value>) -> Result<(), ChannelError> {
        self.channel.emit(event.as_str(), Value::Object(body)).await
    }

    // ===== Fire-and-forget =====

    /// Accept a handshake request, then ask for a fresh chat list.
    pub async fn accept_request(&self, request_id: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        self.emit(
            EventName::AcceptRequest,
            payload([("token", json!(token)), ("requestID", json!(request_id))]),
        )
        .await?;
        self.emit(EventName::OnChats, payload([("token", json!(token))]))
            .await
    }

    pub async fn generate_new_handshake_node(&self) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        self.emit(
            EventName::GenerateNewHandshakeNode,
            payload([("token", json!(token))]),
        )
        .await
    }

    pub async fn logout(&self) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        self.emit(EventName::Logout, payload([("token", json!(token))]))
            .await
    }

    /// Register a new account. Carries no token.
    pub async fn register(&self, alias: &str, pass: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        self.emit(
            EventName::Register,
            payload([("alias", json!(alias)), ("pass", json!(pass))]),
        )
        .await
    }

    pub async fn set_avatar(&self, avatar: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        self.emit(
            EventName::SetAvatar,
            payload([("token", json!(token)), ("avatar", json!(avatar))]),
        )
        .await
    }

    pub async fn set_display_name(&self, display_name: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        self.emit(
            EventName::SetDisplayName,
            payload([("token", json!(token)), ("displayName", json!(display_name))]),
        )
        .await
    }

    // ===== Correlated =====

    pub async fn send_message(&self, recipient_public_key: &str, body: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        self.correlator
            .send_correlated(
                EventName::SendMessage,
                payload([
                    ("token", json!(token)),
                    ("recipientPublicKey", json!(recipient_public_key)),
                    ("body", json!(body)),
                ]),
                EventName::SendMessage,
                CORRELATION_FIELD,
                ReplyMode::Once,
            )
            .await
            .map(|_| ())
    }

    /// Send a payment. The reply is logged whatever its outcome.
    pub async fn send_payment(
        &self,
        recipient_pub: &str,
        amount: u64,
        memo: &str,
    ) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        let emission = self
            .correlator
            .round_trip_with(
                new_token(),
                EventName::SendPayment,
                payload([
                    ("token", json!(token)),
                    ("recipientPub", json!(recipient_pub)),
                    ("amount", json!(amount)),
                    ("memo", json!(memo)),
                ]),
                ReplyMode::Once,
            )
            .await?;

        tracing::info!(
            ok = emission.ok,
            msg = %emission.msg,
            amount,
            "commands: payment reply"
        );
        accept(emission).map(|_| ())
    }

    pub async fn set_bio(&self, bio: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;
        self.correlator
            .send_correlated(
                EventName::SetBio,
                payload([("token", json!(token)), ("bio", json!(bio))]),
                EventName::SetBio,
                CORRELATION_FIELD,
                ReplyMode::Once,
            )
            .await
            .map(|_| ())
    }

    /// Send a handshake request, recording it optimistically in the sent
    /// requests cache. The preconditions and the record are checked and
    /// written together, before the credential lookup, so a concurrent
    /// request to the same peer is refused locally. The record is removed
    /// again if the token lookup or the node rejects it.
    pub async fn send_handshake_request(&self, recipient_public_key: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let uuid = new_token();

        let round_trip = async {
            let token = self.token().await?;
            let emission = self
                .correlator
                .round_trip_with(
                    uuid.clone(),
                    EventName::SendHandshakeRequest,
                    payload([
                        ("token", json!(token)),
                        ("recipientPublicKey", json!(recipient_public_key)),
                    ]),
                    ReplyMode::Once,
                )
                .await?;
            accept(emission)
        };

        speculate(
            || {
                let _guard = self.cache_guard();
                let record = self.pending_request(&uuid, recipient_public_key)?;
                let mut requests: Vec<SentRequest> = self
                    .contacts
                    .sent_requests()
                    .into_iter()
                    .filter(|r| r.recipient_public_key != recipient_public_key)
                    .collect();
                requests.push(record);
                self.contacts.set_sent_requests(requests);
                Ok(())
            },
            |()| {
                let _guard = self.cache_guard();
                let remaining = self
                    .contacts
                    .sent_requests()
                    .into_iter()
                    .filter(|r| r.id != uuid)
                    .collect();
                self.contacts.set_sent_requests(remaining);
            },
            round_trip,
        )
        .await
        .map(|_| ())
    }

    /// Check a new handshake request to `recipient_public_key` is allowed
    /// and build its record from the current cache.
    fn pending_request(&self, uuid: &str, recipient_public_key: &str) -> Result<SentRequest, ChannelError> {
        if self
            .contacts
            .chats()
            .iter()
            .any(|c| c.recipient_public_key == recipient_public_key)
        {
            return Err(ChannelError::Precondition("Handshake already in place".into()));
        }

        let existing = self
            .contacts
            .sent_requests()
            .into_iter()
            .find(|r| r.recipient_public_key == recipient_public_key);
        if existing
            .as_ref()
            .is_some_and(|r| !r.recipient_changed_request_address)
        {
            return Err(ChannelError::Precondition("A request is already in place".into()));
        }

        let (display_name, avatar) = match existing {
            Some(r) => (r.recipient_display_name, r.recipient_avatar),
            None => (None, None),
        };
        Ok(SentRequest {
            id: uuid.to_string(),
            recipient_avatar: avatar,
            recipient_changed_request_address: false,
            recipient_display_name: Some(
                display_name.unwrap_or_else(|| default_display_name(recipient_public_key)),
            ),
            recipient_public_key: recipient_public_key.to_string(),
            timestamp: now_millis(),
        })
    }

    /// Send a handshake request with an opening message. The node may emit
    /// progress replies; the last one within the settle window wins. The
    /// sent requests snapshot is re-requested shortly afterwards, whatever
    /// the outcome.
    pub async fn send_handshake_request_with_initial_msg(
        &self,
        recipient_public_key: &str,
        initial_msg: &str,
    ) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let token = self.token().await?;

        let outcome = self
            .correlator
            .round_trip_with(
                new_token(),
                EventName::SendHandshakeRequestWithInitialMsg,
                payload([
                    ("token", json!(token)),
                    ("recipientPublicKey", json!(recipient_public_key)),
                    ("initialMsg", json!(initial_msg)),
                ]),
                ReplyMode::Settle(self.reply_settle),
            )
            .await;

        let channel = self.channel.clone();
        let delay = self.sent_requests_refresh;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = channel
                .emit(EventName::OnSentRequests.as_str(), json!({ "token": token }))
                .await
            {
                tracing::debug!("commands: sent requests refresh skipped: {e}");
            }
        });

        let emission = outcome?;
        tracing::debug!(ok = emission.ok, "commands: handshake with message reply");
        accept(emission).map(|_| ())
    }

    /// Disconnect from a contact. The chat disappears from the cache at once
    /// and comes back if the token lookup fails or the node rejects the
    /// disconnect.
    pub async fn disconnect_contact(&self, public_key: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;

        let round_trip = async {
            let token = self.token().await?;
            self.correlator
                .send_correlated(
                    EventName::DisconnectContact,
                    payload([("pub", json!(public_key)), ("token", json!(token))]),
                    EventName::DisconnectContact,
                    CORRELATION_FIELD,
                    ReplyMode::Once,
                )
                .await
        };

        speculate(
            || {
                let _guard = self.cache_guard();
                let mut chats = self.contacts.chats();
                let removed: Option<Chat> = chats
                    .iter()
                    .position(|c| c.recipient_public_key == public_key)
                    .map(|idx| chats.remove(idx));
                if removed.is_some() {
                    self.contacts.set_chats(chats);
                }
                Ok(removed)
            },
            |removed| {
                if let Some(chat) = removed {
                    let _guard = self.cache_guard();
                    let mut chats = self.contacts.chats();
                    chats.push(chat);
                    self.contacts.set_chats(chats);
                }
            },
            round_trip,
        )
        .await
        .map(|_| ())
    }
}
