//! Shockwire Client -- resilient encrypted duplex event channel.
//!
//! One long-lived channel to the wallet node: debounced connects, a silence
//! watchdog, sealed payloads, correlated request/reply and the command
//! surface built on top. Modules are public so integration tests and the
//! `shockwire` binary can wire them together.

pub mod channel;
pub mod channel_task;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod error;
pub mod quic;
pub mod speculative;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod watchdog;

use std::sync::Arc;

use shockwire_crypto::EnvelopeCodec;
use tokio::task::JoinHandle;

pub use channel::{spawn_channel, ChannelHandle, ChannelSettings};
pub use commands::CommandSurface;
pub use config::{expand_tilde, ClientConfig};
pub use correlator::{Correlator, ReplyMode};
pub use error::ChannelError;
pub use store::{Collaborators, MemoryStore};
pub use supervisor::{ChannelStatus, ReconnectPolicy};
pub use transport::{Connector, TcpConnector};

/// A running channel plus the command surface bound to it.
pub struct Client {
    pub channel: ChannelHandle,
    pub commands: CommandSurface,
    task: JoinHandle<()>,
}

impl Client {
    /// Spawn the channel task. Nothing is dialled until `connect`.
    pub fn start(
        settings: ChannelSettings,
        connector: Arc<dyn Connector>,
        collab: Collaborators,
        codec: EnvelopeCodec,
    ) -> Self {
        let reply_settle = settings.reply_settle;
        let refresh = settings.sent_requests_refresh;
        let credentials = collab.credentials.clone();
        let contacts = collab.contacts.clone();

        let (channel, task) = spawn_channel(settings, connector, collab, codec);
        let commands = CommandSurface::new(
            channel.clone(),
            credentials,
            contacts,
            reply_settle,
            refresh,
        );

        Self {
            channel,
            commands,
            task,
        }
    }

    pub async fn connect(&self) -> Result<(), ChannelError> {
        self.channel.connect().await
    }

    /// Stop the channel task and wait for it to finish teardown.
    pub async fn shutdown(self) {
        self.channel.shutdown().await;
        if let Err(e) = self.task.await {
            tracing::warn!("client: channel task ended abnormally: {e}");
        }
    }
}
