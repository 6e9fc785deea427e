//! Length-delimited JSON codec for channel byte streams.
//!
//! Wire format: 4-byte big-endian length prefix + serde JSON `Frame`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Frame;
use crate::{ProtocolError, MAX_FRAME_BYTES};

/// Length prefix size in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for framing `Frame` values over a byte stream.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    /// Frames whose body is not a valid `Frame` are logged and skipped; only
    /// an oversized length prefix is an error.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }

            let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

            if length > self.max_frame_bytes {
                tracing::warn!(length, max = self.max_frame_bytes, "codec: oversized frame");
                return Err(ProtocolError::FrameTooLarge {
                    size: length,
                    max: self.max_frame_bytes,
                });
            }

            let total = LENGTH_PREFIX_SIZE + length;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            src.advance(LENGTH_PREFIX_SIZE);
            let frame_bytes = src.split_to(length);

            match serde_json::from_slice::<Frame>(&frame_bytes) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => tracing::warn!(length, "codec: dropping malformed frame: {e}"),
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_bytes,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}
