//! Configuration types for the shockwire client.
//! Parsed from ~/.shockwire/config.toml.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use shockwire_protocol::DEFAULT_TIMING;

use crate::channel::ChannelSettings;
use crate::supervisor::ReconnectPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub crypto: CryptoSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    pub url: Option<String>,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub device_id: Option<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            url: None,
            transport: default_transport(),
            device_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
    #[serde(default = "default_connect_debounce")]
    pub connect_debounce_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reply_settle")]
    pub reply_settle_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_sent_requests_refresh")]
    pub sent_requests_refresh_ms: u64,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff: String,
    #[serde(default = "default_backoff_base")]
    pub reconnect_backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub reconnect_backoff_max_secs: u64,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            watchdog_interval_secs: default_watchdog_interval(),
            connect_debounce_ms: default_connect_debounce(),
            connect_timeout_secs: default_connect_timeout(),
            reply_settle_ms: default_reply_settle(),
            request_timeout_secs: default_request_timeout(),
            sent_requests_refresh_ms: default_sent_requests_refresh(),
            reconnect_backoff: default_reconnect_backoff(),
            reconnect_backoff_base_secs: default_backoff_base(),
            reconnect_backoff_max_secs: default_backoff_max(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoSection {
    /// Diagnostic bypass. Only honoured in debug builds or with the
    /// `insecure-bypass` feature.
    #[serde(default)]
    pub disable_encryption: bool,
}

/// Seed values for the in-memory stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSection {
    pub token: Option<String>,
    pub remote_public_key: Option<String>,
    pub session_id: Option<String>,
    /// Base64 X25519 secret for `session_id`.
    pub session_secret: Option<String>,
}

// Default value functions
fn default_transport() -> String {
    "tcp".into()
}
fn default_watchdog_interval() -> u64 {
    DEFAULT_TIMING.watchdog_interval_secs
}
fn default_connect_debounce() -> u64 {
    DEFAULT_TIMING.connect_debounce_ms
}
fn default_connect_timeout() -> u64 {
    DEFAULT_TIMING.connect_timeout_secs
}
fn default_reply_settle() -> u64 {
    DEFAULT_TIMING.reply_settle_ms
}
fn default_request_timeout() -> u64 {
    DEFAULT_TIMING.request_timeout_secs
}
fn default_sent_requests_refresh() -> u64 {
    DEFAULT_TIMING.sent_requests_refresh_ms
}
fn default_reconnect_backoff() -> String {
    "fixed".into()
}
fn default_backoff_base() -> u64 {
    DEFAULT_TIMING.reconnect_backoff_base_secs
}
fn default_backoff_max() -> u64 {
    DEFAULT_TIMING.reconnect_backoff_max_secs
}

impl ClientConfig {
    /// Load config from file, or use defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.node.transport.as_str() {
            "tcp" | "quic" => {}
            other => anyhow::bail!("unknown transport {other:?} (expected \"tcp\" or \"quic\")"),
        }
        self.reconnect_policy()?;
        if self.channel.watchdog_interval_secs == 0 {
            anyhow::bail!("watchdog_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> anyhow::Result<ReconnectPolicy> {
        let c = &self.channel;
        match c.reconnect_backoff.as_str() {
            "fixed" => Ok(ReconnectPolicy::Fixed(Duration::from_secs(
                c.watchdog_interval_secs,
            ))),
            "exponential" => Ok(ReconnectPolicy::Exponential {
                base: Duration::from_secs(c.reconnect_backoff_base_secs),
                max: Duration::from_secs(c.reconnect_backoff_max_secs),
                saturation: DEFAULT_TIMING.backoff_saturation_count,
            }),
            other => anyhow::bail!(
                "unknown reconnect_backoff {other:?} (expected \"fixed\" or \"exponential\")"
            ),
        }
    }

    pub fn channel_settings(&self) -> anyhow::Result<ChannelSettings> {
        let c = &self.channel;
        Ok(ChannelSettings {
            connect_debounce: Duration::from_millis(c.connect_debounce_ms),
            watchdog_interval: Duration::from_secs(c.watchdog_interval_secs),
            reconnect: self.reconnect_policy()?,
            reply_settle: Duration::from_millis(c.reply_settle_ms),
            request_timeout: match c.request_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            sent_requests_refresh: Duration::from_millis(c.sent_requests_refresh_ms),
            command_queue: DEFAULT_TIMING.outbound_queue,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.channel.connect_timeout_secs)
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
