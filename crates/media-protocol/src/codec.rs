//! Codec for encoding and decoding raw video frames.
//!
//! Payload layout (16-byte header, big-endian integers):
//!
//! ```text
//! ┌─────────┬───────┬────────┬──────────┬──────────┬──────────────────┐
//! │ version │ width │ height │ channels │ reserved │ pixels           │
//! │ u8      │ u32   │ u32    │ u8       │ 6 bytes  │ w * h * channels │
//! └─────────┴───────┴────────┴──────────┴──────────┴──────────────────┘
//! ```
//!
//! No compression is applied, so the payload is the raw buffer plus the
//! fixed header and its size drives the reported bitrate directly.

use crate::frame::{FrameShape, VideoFrame};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Insufficient data to decode
    #[error("Insufficient data")]
    InsufficientData,

    /// Unsupported version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Frame shape cannot describe a real buffer
    #[error("Invalid frame shape: {0}")]
    InvalidShape(String),

    /// Pixel buffer length disagrees with the declared shape
    #[error("Pixel length mismatch: expected {expected} bytes, got {actual}")]
    PixelLengthMismatch {
        /// Bytes implied by `width * height * channels`
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },
}

/// Current payload version.
pub const VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Size of an encoded payload for a frame of the given shape.
#[must_use]
pub fn encoded_len(shape: FrameShape) -> Option<usize> {
    shape.pixel_len()?.checked_add(HEADER_SIZE)
}

/// Encode a video frame to bytes
///
/// # Errors
///
/// Returns an error if the frame's pixel buffer does not match its shape.
/// [`VideoFrame::new`] already guarantees this, so encoding a constructed
/// frame only fails on internal inconsistency.
pub fn encode_frame(frame: &VideoFrame) -> Result<Bytes, CodecError> {
    let shape = frame.shape();
    let expected = shape.pixel_len().ok_or_else(|| {
        CodecError::InvalidShape(format!("{shape} overflows"))
    })?;
    if frame.pixels().len() != expected {
        return Err(CodecError::PixelLengthMismatch {
            expected,
            actual: frame.pixels().len(),
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + expected);

    // Version (1 byte)
    buf.put_u8(VERSION);

    // Width, height (4 bytes each)
    buf.put_u32(shape.width);
    buf.put_u32(shape.height);

    // Channels (1 byte)
    buf.put_u8(shape.channels);

    // Reserved (6 bytes)
    buf.put_bytes(0, 6);

    // Pixels
    buf.extend_from_slice(frame.pixels());

    Ok(buf.freeze())
}

/// Decode a video frame from bytes
///
/// The buffer must hold exactly one payload: leftover bytes after the pixel
/// data are rejected rather than ignored.
///
/// # Errors
///
/// Returns an error if the header is short or unknown, the shape is invalid,
/// or the pixel data is shorter or longer than the shape requires.
pub fn decode_frame(data: &mut impl Buf) -> Result<VideoFrame, CodecError> {
    // Check if we have enough data for the header
    if data.remaining() < HEADER_SIZE {
        return Err(CodecError::InsufficientData);
    }

    let version = data.get_u8();
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let width = data.get_u32();
    let height = data.get_u32();
    let channels = data.get_u8();

    // Reserved (6 bytes) - skip
    data.advance(6);

    let shape = FrameShape::new(width, height, channels);
    shape.validate()?;
    let expected = shape
        .pixel_len()
        .ok_or_else(|| CodecError::InvalidShape(format!("{shape} overflows")))?;

    if data.remaining() != expected {
        return Err(CodecError::PixelLengthMismatch {
            expected,
            actual: data.remaining(),
        });
    }

    let pixels = data.copy_to_bytes(expected);
    VideoFrame::new(shape, pixels)
}
