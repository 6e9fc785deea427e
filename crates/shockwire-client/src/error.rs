//! Channel error taxonomy surfaced to callers.

use shockwire_crypto::CryptoError;
use shockwire_protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel not connected")]
    NotConnected,
    #[error("no key exchange: remote public key not established")]
    NoKeyExchange,
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("{0}")]
    RemoteRejection(String),
    #[error("no node url cached")]
    NoNodeUrl,
    #[error("no credentials cached")]
    NoCredentials,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("no reply on {event} before timeout")]
    Timeout { event: String },
    #[error("{0}")]
    Precondition(String),
    #[error("outbound queue full")]
    QueueFull,
    #[error("channel task closed")]
    Closed,
}

impl ChannelError {
    /// Rejection built from a negative acknowledgement.
    pub fn rejected(msg: Option<String>) -> Self {
        ChannelError::RemoteRejection(msg.unwrap_or_else(|| "Unknown Error".into()))
    }
}

impl From<CryptoError> for ChannelError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::NoKeyExchange => ChannelError::NoKeyExchange,
            CryptoError::MissingSession
            | CryptoError::UnknownSession(_)
            | CryptoError::DecryptionFailed => ChannelError::Decryption(e.to_string()),
            other => ChannelError::Encryption(other.to_string()),
        }
    }
}

impl From<ProtocolError> for ChannelError {
    fn from(e: ProtocolError) -> Self {
        ChannelError::ConnectFailed(e.to_string())
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::ConnectFailed(e.to_string())
    }
}
