//! Channel task -- owns the live link, the supervisor and the correlation
//! table, and serialises every mutation of them.
//!
//! Loop inputs:
//!   1. Commands from handles (connect, disconnect, emit, request, shutdown)
//!   2. The in-flight dial, if any
//!   3. Events from the live link, if any
//!   4. The earliest supervisor/correlator deadline
//!
//! Teardown order: watchdog, link, session handle, then the down notice.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use shockwire_crypto::{key_fingerprint, EnvelopeCodec};
use shockwire_protocol::{route_for, Emission, EventName, Frame, Route};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::channel::ChannelSettings;
use crate::correlator::{CorrelationTable, ReplyMode, ReplySlot};
use crate::error::ChannelError;
use crate::store::{ChannelNotice, Collaborators};
use crate::supervisor::{ChannelStatus, Supervisor, TeardownReason};
use crate::transport::{Connector, Link, LinkEvent};

/// Commands sent from handles to the channel task.
#[derive(Debug)]
pub enum ChannelCommand {
    Connect {
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Disconnect {
        reply: oneshot::Sender<bool>,
    },
    Emit {
        frame: Frame,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Request {
        frame: Frame,
        reply_event: String,
        token: String,
        field: String,
        mode: ReplyMode,
        slot: ReplySlot,
    },
    Shutdown,
}

type DialFuture = Pin<Box<dyn Future<Output = Result<Link, ChannelError>> + Send>>;

pub(crate) struct ChannelTask {
    settings: ChannelSettings,
    supervisor: Supervisor,
    connector: Arc<dyn Connector>,
    collab: Collaborators,
    codec: EnvelopeCodec,
    status_tx: watch::Sender<ChannelStatus>,
    link: Option<Link>,
    dialing: Option<DialFuture>,
    /// Callers waiting on the outcome of the next dial.
    waiters: Vec<oneshot::Sender<Result<(), ChannelError>>>,
    table: CorrelationTable,
}

impl ChannelTask {
    pub(crate) fn new(
        settings: ChannelSettings,
        connector: Arc<dyn Connector>,
        collab: Collaborators,
        codec: EnvelopeCodec,
        status_tx: watch::Sender<ChannelStatus>,
    ) -> Self {
        let supervisor = Supervisor::new(
            settings.connect_debounce,
            settings.watchdog_interval,
            settings.reconnect,
        );
        Self {
            settings,
            supervisor,
            connector,
            collab,
            codec,
            status_tx,
            link: None,
            dialing: None,
            waiters: Vec::new(),
            table: CorrelationTable::new(),
        }
    }

    /// Run until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<ChannelCommand>) {
        tracing::debug!("channel: task started");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                result = poll_dial(&mut self.dialing), if self.dialing.is_some() => {
                    self.dialing = None;
                    if let Some(result) = result {
                        self.on_dial_result(result);
                    }
                },
                event = recv_link(&mut self.link), if self.link.is_some() => {
                    self.on_link_event(event);
                },
                _ = sleep_until(deadline) => {
                    self.on_deadline();
                },
            }

            self.publish_status();
        }

        self.supervisor.request_disconnect();
        self.teardown(TeardownReason::Requested);
        self.resolve_waiters(Err(ChannelError::Closed));
        self.publish_status();
        tracing::debug!("channel: task stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.supervisor.next_deadline(), self.table.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    // ===== Commands =====

    fn handle_command(&mut self, cmd: ChannelCommand) {
        match cmd {
            ChannelCommand::Connect { reply } => {
                self.supervisor.request_connect(Instant::now());
                self.waiters.push(reply);
                tracing::debug!(waiters = self.waiters.len(), "channel: connect requested");
            }
            ChannelCommand::Disconnect { reply } => {
                let had_session = self.supervisor.request_disconnect();
                self.teardown(TeardownReason::Requested);
                self.resolve_waiters(Err(ChannelError::NotConnected));
                if !had_session {
                    tracing::debug!("channel: disconnect with no session");
                }
                let _ = reply.send(had_session);
            }
            ChannelCommand::Emit { frame, reply } => {
                let _ = reply.send(self.send_frame(frame));
            }
            ChannelCommand::Request {
                frame,
                reply_event,
                token,
                field,
                mode,
                slot,
            } => {
                if let Err(e) = self.send_frame(frame) {
                    let _ = slot.send(Err(e));
                    return;
                }
                let expires_at = self.settings.request_timeout.map(|t| Instant::now() + t);
                self.table
                    .register(&reply_event, token, field, mode, expires_at, slot);
            }
            ChannelCommand::Shutdown => {}
        }
    }

    fn send_frame(&self, frame: Frame) -> Result<(), ChannelError> {
        match (&self.link, self.supervisor.status()) {
            (Some(link), ChannelStatus::Connected) => {
                tracing::trace!(event = %frame.event, "channel: emit");
                link.try_send(frame)
            }
            _ => Err(ChannelError::NotConnected),
        }
    }

    // ===== Dialling =====

    fn start_dial(&mut self) {
        let connector = self.connector.clone();
        let endpoint = self.collab.endpoint.clone();
        let device_id = self.collab.connection.device_id();

        self.dialing = Some(Box::pin(async move {
            let url = endpoint.node_url().await.ok_or(ChannelError::NoNodeUrl)?;
            tracing::info!(%url, device = %device_id, "channel: dialing");
            connector.connect(&url, &device_id).await
        }));
    }

    fn on_dial_result(&mut self, result: Result<Link, ChannelError>) {
        let now = Instant::now();
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.supervisor.on_connected(now);
                if self.codec.is_bypassed() {
                    tracing::warn!("channel: connected with ENCRYPTION BYPASS ACTIVE");
                }
                match self.collab.keys.remote_public_key() {
                    Some(key) => tracing::info!(remote = %key_fingerprint(&key), "channel: connected"),
                    None => tracing::info!("channel: connected (no key exchange yet)"),
                }
                self.collab.connection.dispatch(ChannelNotice::Up);
                self.resolve_waiters(Ok(()));
            }
            Err(e) => {
                self.supervisor.on_connect_failed(now);
                tracing::warn!(
                    failures = self.supervisor.failures(),
                    "channel: connect_error: {e}"
                );
                // A newer connect request is still pending; its waiters stay queued
                if !self.supervisor.connect_pending() {
                    self.resolve_waiters(Err(e));
                }
            }
        }
    }

    // ===== Inbound =====

    fn on_link_event(&mut self, event: LinkEvent) {
        let now = Instant::now();
        match event {
            LinkEvent::Frame(frame) => {
                self.supervisor.on_activity(now);
                self.on_frame(frame, now);
            }
            LinkEvent::Error(e) => {
                tracing::warn!("channel: link error: {e}");
            }
            LinkEvent::Closed { reason } => {
                self.supervisor.on_link_lost(now);
                self.teardown(TeardownReason::Remote(reason));
            }
        }
    }

    fn on_frame(&mut self, frame: Frame, now: Instant) {
        let Frame { event, data } = frame;
        let route = route_for(&event);

        match route {
            Route::Lifecycle => {
                if event == EventName::Disconnect.as_str() {
                    let reason = data
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| "server disconnect".into());
                    self.supervisor.on_link_lost(now);
                    self.teardown(TeardownReason::Remote(reason));
                } else if event == EventName::Error.as_str() {
                    tracing::warn!(%data, "channel: node reported error");
                } else {
                    tracing::debug!(%event, "channel: lifecycle frame");
                }
            }
            Route::Liveness => {
                tracing::trace!(%event, "channel: liveness ping");
            }
            Route::Reply | Route::Broadcast => {
                let data = match self.codec.open(&event, data) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!(%event, "channel: dropping undecryptable frame: {e}");
                        return;
                    }
                };

                if route == Route::Reply {
                    match serde_json::from_value::<Emission>(data) {
                        Ok(emission) => {
                            if !self.table.deliver(&event, emission, now) {
                                tracing::debug!(%event, "channel: unmatched reply");
                            }
                        }
                        Err(e) => tracing::warn!(%event, "channel: malformed reply: {e}"),
                    }
                } else {
                    self.collab.events.on_broadcast(&event, data);
                }
            }
        }
    }

    // ===== Timers =====

    fn on_deadline(&mut self) {
        let now = Instant::now();
        self.table.tick(now);

        let actions = self.supervisor.tick(now);
        if let Some(reason) = actions.teardown {
            self.teardown(reason);
        }
        if let Some(attempt) = actions.reconnect_attempt {
            tracing::info!(attempt, "channel: reconnect_attempt");
        }
        if actions.dial {
            self.start_dial();
        }
    }

    // ===== Session =====

    /// Drop the dial and the link. Dispatches the down notice if a link existed.
    fn teardown(&mut self, reason: TeardownReason) {
        self.dialing = None;
        if let Some(link) = self.link.take() {
            drop(link);
            tracing::info!(%reason, "channel: disconnected");
            self.collab.connection.dispatch(ChannelNotice::Down {
                reason: reason.to_string(),
            });
        }
    }

    /// Waiters observe the status as of their outcome.
    fn resolve_waiters(&mut self, result: Result<(), ChannelError>) {
        self.publish_status();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn publish_status(&self) {
        let status = self.supervisor.status();
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                tracing::debug!(from = %current, to = %status, "channel: status");
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

async fn poll_dial(dialing: &mut Option<DialFuture>) -> Option<Result<Link, ChannelError>> {
    match dialing {
        Some(dial) => Some(dial.await),
        None => None,
    }
}

async fn recv_link(link: &mut Option<Link>) -> LinkEvent {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
