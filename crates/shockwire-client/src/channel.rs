//! Channel handle -- the owned, cloneable front of the channel task.
//!
//! There is one channel task per client. Every handle clone talks to it
//! over the command queue. Outbound payloads are sealed here, in the caller,
//! so a missing key exchange fails the call without touching the task.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use shockwire_crypto::EnvelopeCodec;
use shockwire_protocol::{Emission, Frame, DEFAULT_TIMING};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::channel_task::{ChannelCommand, ChannelTask};
use crate::correlator::ReplyMode;
use crate::error::ChannelError;
use crate::store::Collaborators;
use crate::supervisor::{ChannelStatus, ReconnectPolicy};
use crate::transport::Connector;

/// Runtime settings for one channel.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub connect_debounce: Duration,
    pub watchdog_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub reply_settle: Duration,
    /// None disables eviction of unanswered requests.
    pub request_timeout: Option<Duration>,
    pub sent_requests_refresh: Duration,
    pub command_queue: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        let t = DEFAULT_TIMING;
        let watchdog_interval = Duration::from_secs(t.watchdog_interval_secs);
        Self {
            connect_debounce: Duration::from_millis(t.connect_debounce_ms),
            watchdog_interval,
            reconnect: ReconnectPolicy::Fixed(watchdog_interval),
            reply_settle: Duration::from_millis(t.reply_settle_ms),
            request_timeout: match t.request_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            sent_requests_refresh: Duration::from_millis(t.sent_requests_refresh_ms),
            command_queue: t.outbound_queue,
        }
    }
}

#[derive(Clone)]
pub struct ChannelHandle {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    status: watch::Receiver<ChannelStatus>,
    codec: EnvelopeCodec,
}

/// Start the channel task. The channel starts disconnected.
pub fn spawn_channel(
    settings: ChannelSettings,
    connector: Arc<dyn Connector>,
    collab: Collaborators,
    codec: EnvelopeCodec,
) -> (ChannelHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(settings.command_queue);
    let (status_tx, status_rx) = watch::channel(ChannelStatus::Disconnected);

    let task = ChannelTask::new(settings, connector, collab, codec.clone(), status_tx);
    let join = tokio::spawn(task.run(cmd_rx));

    (
        ChannelHandle {
            cmd_tx,
            status: status_rx,
            codec,
        },
        join,
    )
}

impl ChannelHandle {
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    /// Status stream for connectivity banners.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Wait until the channel reports `status`.
    pub async fn wait_for(&self, status: ChannelStatus) -> Result<(), ChannelError> {
        let mut rx = self.status.clone();
        rx.wait_for(|s| *s == status)
            .await
            .map(|_| ())
            .map_err(|_| ChannelError::Closed)
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Request a connection. Calls within the debounce window collapse into
    /// one attempt; every caller gets that attempt's outcome.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.send(ChannelCommand::Connect { reply }).await?;
        rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Tear the session down and stop reconnecting. Returns false if there
    /// was no session.
    pub async fn disconnect(&self) -> Result<bool, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.send(ChannelCommand::Disconnect { reply }).await?;
        rx.await.map_err(|_| ChannelError::Closed)
    }

    /// Fire-and-forget emit.
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let data = self.codec.seal(event, payload)?;
        let (reply, rx) = oneshot::channel();
        self.send(ChannelCommand::Emit {
            frame: Frame::new(event, data),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Emit and register for the correlated reply. The returned receiver
    /// resolves once, with the reply or with the reason there is none.
    pub async fn request(
        &self,
        event: &str,
        payload: Value,
        reply_event: &str,
        token: String,
        field: &str,
        mode: ReplyMode,
    ) -> Result<oneshot::Receiver<Result<Emission, ChannelError>>, ChannelError> {
        let data = self.codec.seal(event, payload)?;
        let (slot, rx) = oneshot::channel();
        self.send(ChannelCommand::Request {
            frame: Frame::new(event, data),
            reply_event: reply_event.to_string(),
            token,
            field: field.to_string(),
            mode,
            slot,
        })
        .await?;
        Ok(rx)
    }

    /// Stop the channel task.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ChannelCommand::Shutdown).await;
    }

    async fn send(&self, cmd: ChannelCommand) -> Result<(), ChannelError> {
        self.cmd_tx.send(cmd).await.map_err(|_| ChannelError::Closed)
    }
}
