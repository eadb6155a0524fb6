//! Length-prefixed framing for the data channel.
//!
//! Every message on the data channel is:
//!
//! ```text
//! ┌──────────────────┬─────────────────────────────┐
//! │ Length (8 bytes) │ Payload (Length bytes)      │
//! │ Big-endian u64   │ codec-encoded video frame   │
//! └──────────────────┴─────────────────────────────┘
//! ```
//!
//! There is no checksum or sequence number; ordering and integrity come
//! from the underlying TCP stream. The receive side uses
//! [`FrameAccumulator`], which accepts bytes in whatever chunks the socket
//! delivers and yields whole payloads once they are complete.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::codec::{decode_frame, encode_frame, CodecError};
use crate::frame::VideoFrame;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Socket read size used by receivers.
pub const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Default upper bound on a single payload (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Error type for framing operations
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Declared payload length exceeds the configured maximum
    #[error("Message of {declared} bytes exceeds maximum of {max}")]
    Oversized {
        /// Length from the prefix
        declared: u64,
        /// Configured maximum
        max: usize,
    },

    /// Payload failed to decode as a frame
    #[error("Frame decode failed: {0}")]
    Codec(#[from] CodecError),
}

/// Prefix an already-encoded payload with its length.
///
/// The result is one contiguous buffer so it can go out in a single write.
#[must_use]
pub fn frame_payload(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u64(payload.len() as u64);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Encode a frame and prefix it with its length.
///
/// # Errors
///
/// Returns an error if the frame cannot be encoded.
pub fn encode_message(frame: &VideoFrame) -> Result<Bytes, FramingError> {
    let payload = encode_frame(frame)?;
    Ok(frame_payload(&payload))
}

/// A complete message pulled out of the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMessage {
    /// Payload bytes (without the prefix)
    pub payload: Bytes,
}

impl FrameMessage {
    /// Bytes this message occupied on the wire, prefix included.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }

    /// Decode the payload as a video frame.
    ///
    /// # Errors
    ///
    /// Returns the codec error if the payload is malformed.
    pub fn decode(&self) -> Result<VideoFrame, FramingError> {
        Ok(decode_frame(&mut self.payload.clone())?)
    }
}

/// Receive-side byte accumulator.
///
/// Owned by exactly one receive loop. Bytes are appended with
/// [`push`](Self::push); [`next_message`](Self::next_message) hands out
/// each complete message and removes its prefix and payload from the front
/// of the buffer, leaving any excess for the next call.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: BytesMut,
    /// Length of the message whose prefix has been consumed but whose
    /// payload is still incomplete.
    pending: Option<usize>,
    max_message_size: usize,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameAccumulator {
    /// Create an empty accumulator that rejects payloads above `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE * 2),
            pending: None,
            max_message_size,
        }
    }

    /// Append bytes read from the socket.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned as a message.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len() + self.pending.map_or(0, |_| LENGTH_PREFIX_SIZE)
    }

    /// Whether a partially received message is sitting in the buffer.
    #[must_use]
    pub fn is_mid_message(&self) -> bool {
        self.pending.is_some() || !self.buf.is_empty()
    }

    /// Pop the next complete message, if one is available.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Oversized`] if a prefix declares a payload
    /// larger than the configured maximum. The stream cannot be resynced
    /// after that, so the caller should drop the connection.
    pub fn next_message(&mut self) -> Result<Option<FrameMessage>, FramingError> {
        let len = match self.pending {
            Some(len) => len,
            None => {
                if self.buf.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let declared = self.buf.get_u64();
                let Some(len) = usize::try_from(declared)
                    .ok()
                    .filter(|len| *len <= self.max_message_size)
                else {
                    debug!(
                        target: "media.framing",
                        declared,
                        max = self.max_message_size,
                        "Rejecting oversized length prefix"
                    );
                    return Err(FramingError::Oversized {
                        declared,
                        max: self.max_message_size,
                    });
                };
                self.pending = Some(len);
                len
            }
        };

        if self.buf.len() < len {
            return Ok(None);
        }

        self.pending = None;
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(FrameMessage { payload }))
    }
}
