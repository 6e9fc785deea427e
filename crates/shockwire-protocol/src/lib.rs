//! Shockwire Protocol -- wire types, frame codec, event catalogue.
//!
//! One bidirectional byte stream per channel.
//! 4-byte big-endian length prefix + serde JSON `Frame { event, data }`.

pub mod codec;
pub mod events;
pub mod messages;
pub mod timing;

pub use codec::FrameCodec;
pub use events::{encryption_for, route_for, Encryption, EventName, Route};
pub use messages::*;
pub use timing::{ChannelTiming, DEFAULT_TIMING};

/// Maximum frame size in bytes (sourced from default timing).
pub const MAX_FRAME_BYTES: usize = DEFAULT_TIMING.max_frame_bytes;

/// Default request field carrying the correlation token.
pub const CORRELATION_FIELD: &str = "uuid";

/// Query key carrying the device identifier on connect.
pub const DEVICE_ID_KEY: &str = "x-shockwallet-device-id";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("codec error: {0}")]
    Codec(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
