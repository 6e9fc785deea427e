//! Request/response over a pub/sub channel.
//!
//! A command is emitted with a correlation token in one of its fields; the
//! node echoes the whole request back as `origBody` on the reply event.
//! `CorrelationTable` (owned by the channel task) matches replies to pending
//! requests by reply event and echoed token. `Correlator` is the caller-side
//! front: token generation, connection check, `ok: false` -> rejection.
//!
//! Each pending entry resolves at most once. Entries are evicted after the
//! request timeout, and dropped early if the caller stops waiting.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde_json::{Map, Value};
use shockwire_protocol::{Emission, EventName, CORRELATION_FIELD};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::channel::ChannelHandle;
use crate::error::ChannelError;

/// How replies for one request are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// First matching reply resolves.
    Once,
    /// Matching replies collapse; the last one resolves after this much quiet.
    Settle(Duration),
}

/// Single-resolution result slot for one pending request.
pub type ReplySlot = oneshot::Sender<Result<Emission, ChannelError>>;

/// Practically-unique correlation token: wall-clock nanoseconds plus 64 random bits.
pub fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let entropy: u64 = rand::thread_rng().gen();
    format!("{nanos}-{entropy:016x}")
}

// ============================================================================
// Correlation table
// ============================================================================

#[derive(Debug)]
struct Pending {
    token: String,
    field: String,
    mode: ReplyMode,
    slot: ReplySlot,
    latest: Option<Emission>,
    settle_at: Option<Instant>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    /// Reply event -> pending requests, in registration order.
    pending: HashMap<String, Vec<Pending>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        reply_event: &str,
        token: String,
        field: String,
        mode: ReplyMode,
        expires_at: Option<Instant>,
        slot: ReplySlot,
    ) {
        self.pending
            .entry(reply_event.to_string())
            .or_default()
            .push(Pending {
                token,
                field,
                mode,
                slot,
                latest: None,
                settle_at: None,
                expires_at,
            });
    }

    /// Offer a reply. Returns true if it matched a pending request.
    pub fn deliver(&mut self, event: &str, emission: Emission, now: Instant) -> bool {
        let Some(list) = self.pending.get_mut(event) else {
            return false;
        };
        let Some(idx) = list
            .iter()
            .position(|p| emission.correlation(&p.field) == Some(p.token.as_str()))
        else {
            return false;
        };

        match list[idx].mode {
            ReplyMode::Once => {
                let pending = list.remove(idx);
                let _ = pending.slot.send(Ok(emission));
            }
            ReplyMode::Settle(quiet) => {
                let pending = &mut list[idx];
                pending.latest = Some(emission);
                pending.settle_at = Some(now + quiet);
            }
        }

        if list.is_empty() {
            self.pending.remove(event);
        }
        true
    }

    /// Resolve settled entries, evict expired ones, drop abandoned ones.
    pub fn tick(&mut self, now: Instant) {
        for (event, list) in self.pending.iter_mut() {
            let entries = std::mem::take(list);
            for mut pending in entries {
                if pending.slot.is_closed() {
                    continue;
                }
                let settled = pending.settle_at.is_some_and(|at| at <= now);
                let expired = pending.expires_at.is_some_and(|at| at <= now);

                if settled || (expired && pending.latest.is_some()) {
                    if let Some(emission) = pending.latest.take() {
                        let _ = pending.slot.send(Ok(emission));
                    }
                } else if expired {
                    tracing::debug!(
                        event = %event,
                        token = %pending.token,
                        "correlator: request timed out"
                    );
                    let _ = pending.slot.send(Err(ChannelError::Timeout {
                        event: event.clone(),
                    }));
                } else {
                    list.push(pending);
                }
            }
        }
        self.pending.retain(|_, list| !list.is_empty());
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .flatten()
            .flat_map(|p| [p.settle_at, p.expires_at])
            .flatten()
            .min()
    }

    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Caller-side front
// ============================================================================

/// Issues correlated commands through a channel handle.
#[derive(Clone)]
pub struct Correlator {
    channel: ChannelHandle,
}

impl Correlator {
    pub fn new(channel: ChannelHandle) -> Self {
        Self { channel }
    }

    /// Emit `event` with a fresh token in `field` and await the matching
    /// reply on `reply_event`. `ok: false` rejects with the remote message.
    pub async fn send_correlated(
        &self,
        event: EventName,
        payload: Map<String, Value>,
        reply_event: EventName,
        field: &str,
        mode: ReplyMode,
    ) -> Result<Emission, ChannelError> {
        let emission = self
            .round_trip(new_token(), event, payload, reply_event, field, mode)
            .await?;
        accept(emission)
    }

    /// Like `send_correlated` with a caller-chosen token, but returns the
    /// reply whatever its `ok` flag.
    pub async fn round_trip(
        &self,
        token: String,
        event: EventName,
        mut payload: Map<String, Value>,
        reply_event: EventName,
        field: &str,
        mode: ReplyMode,
    ) -> Result<Emission, ChannelError> {
        if !self.channel.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        payload.insert(field.to_string(), Value::String(token.clone()));
        let reply = self
            .channel
            .request(
                event.as_str(),
                Value::Object(payload),
                reply_event.as_str(),
                token,
                field,
                mode,
            )
            .await?;

        reply.await.map_err(|_| ChannelError::Closed)?
    }

    /// Round trip on the default correlation field with a caller-chosen token.
    pub async fn round_trip_with(
        &self,
        token: String,
        event: EventName,
        payload: Map<String, Value>,
        mode: ReplyMode,
    ) -> Result<Emission, ChannelError> {
        self.round_trip(token, event, payload, event, CORRELATION_FIELD, mode)
            .await
    }
}

/// Turn a negative acknowledgement into an error.
pub fn accept(emission: Emission) -> Result<Emission, ChannelError> {
    if emission.ok {
        Ok(emission)
    } else {
        Err(ChannelError::rejected(emission.message()))
    }
}
