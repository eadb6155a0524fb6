//! Control channel command tokens.
//!
//! Commands travel as bare ASCII tokens with no length prefix:
//!
//! | Command | Wire bytes |
//! |---------|------------|
//! | Start | `START_STREAMING` |
//! | Stop | `STOP_STREAMING` |
//! | `AlreadyStreaming` | `ALREADY_STREAMING` |
//!
//! The protocol is half-duplex by convention, so a single read normally
//! carries exactly one token. TCP makes no such promise, though, and
//! [`ControlDecoder`] splits coalesced tokens and waits out split ones.

use bytes::{Buf, Bytes, BytesMut};

/// Wire bytes for [`ControlCommand::Start`].
pub const START_TOKEN: &[u8] = b"START_STREAMING";

/// Wire bytes for [`ControlCommand::Stop`].
pub const STOP_TOKEN: &[u8] = b"STOP_STREAMING";

/// Wire bytes for [`ControlCommand::AlreadyStreaming`].
pub const ALREADY_STREAMING_TOKEN: &[u8] = b"ALREADY_STREAMING";

/// A control channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Request (consumer) or acknowledge (producer) the start of streaming
    Start,
    /// Stop streaming now
    Stop,
    /// Producer is busy with another consumer
    AlreadyStreaming,
    /// Bytes that match no known token
    Unknown(Bytes),
}

impl ControlCommand {
    /// Wire representation. `Unknown` echoes its raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Start => START_TOKEN,
            Self::Stop => STOP_TOKEN,
            Self::AlreadyStreaming => ALREADY_STREAMING_TOKEN,
            Self::Unknown(raw) => raw,
        }
    }

    /// Parse one complete token.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        match raw {
            START_TOKEN => Self::Start,
            STOP_TOKEN => Self::Stop,
            ALREADY_STREAMING_TOKEN => Self::AlreadyStreaming,
            other => Self::Unknown(Bytes::copy_from_slice(other)),
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::AlreadyStreaming => "already_streaming",
            Self::Unknown(_) => "unknown",
        }
    }
}

const KNOWN: [(&[u8], ControlCommand); 3] = [
    (START_TOKEN, ControlCommand::Start),
    (STOP_TOKEN, ControlCommand::Stop),
    (ALREADY_STREAMING_TOKEN, ControlCommand::AlreadyStreaming),
];

/// Incremental control token decoder.
///
/// Feed it whatever each socket read returned; pull commands out with
/// [`next_command`](Self::next_command).
#[derive(Debug, Default)]
pub struct ControlDecoder {
    buf: BytesMut,
}

impl ControlDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Whether undecoded bytes are buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Pop the next command, or `None` if the buffer holds only the start
    /// of a known token.
    ///
    /// Input that cannot begin any known token is returned whole as
    /// [`ControlCommand::Unknown`], up to the next position where a known
    /// token starts.
    pub fn next_command(&mut self) -> Option<ControlCommand> {
        if self.buf.is_empty() {
            return None;
        }

        for (token, command) in &KNOWN {
            if self.buf.starts_with(token) {
                self.buf.advance(token.len());
                return Some(command.clone());
            }
        }

        if KNOWN
            .iter()
            .any(|(token, _)| token.starts_with(&self.buf))
        {
            return None;
        }

        // Unknown bytes: return everything up to the next plausible token start.
        let cut = (1..self.buf.len())
            .find(|&i| {
                self.buf.get(i..).is_some_and(|rest| {
                    KNOWN
                        .iter()
                        .any(|(token, _)| token.starts_with(rest) || rest.starts_with(token))
                })
            })
            .unwrap_or(self.buf.len());
        Some(ControlCommand::Unknown(self.buf.split_to(cut).freeze()))
    }

    /// Drain whatever is buffered as a single unknown command.
    ///
    /// Used when the peer closes mid-token.
    pub fn take_remainder(&mut self) -> Option<ControlCommand> {
        if self.buf.is_empty() {
            None
        } else {
            Some(ControlCommand::parse(&self.buf.split().freeze()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_byte_identical() {
        assert_eq!(ControlCommand::Start.as_bytes(), b"START_STREAMING");
        assert_eq!(ControlCommand::Stop.as_bytes(), b"STOP_STREAMING");
        assert_eq!(
            ControlCommand::AlreadyStreaming.as_bytes(),
            b"ALREADY_STREAMING"
        );
    }

    #[test]
    fn test_parse_known_and_unknown() {
        assert_eq!(ControlCommand::parse(b"START_STREAMING"), ControlCommand::Start);
        assert_eq!(ControlCommand::parse(b"STOP_STREAMING"), ControlCommand::Stop);
        assert_eq!(
            ControlCommand::parse(b"ALREADY_STREAMING"),
            ControlCommand::AlreadyStreaming
        );
        assert_eq!(
            ControlCommand::parse(b"PAUSE"),
            ControlCommand::Unknown(Bytes::from_static(b"PAUSE"))
        );
    }

    #[test]
    fn test_decoder_single_token() {
        let mut decoder = ControlDecoder::new();
        decoder.push(b"START_STREAMING");
        assert_eq!(decoder.next_command(), Some(ControlCommand::Start));
        assert_eq!(decoder.next_command(), None);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decoder_split_token() {
        let mut decoder = ControlDecoder::new();
        decoder.push(b"STOP_ST");
        assert_eq!(decoder.next_command(), None);
        decoder.push(b"REAMING");
        assert_eq!(decoder.next_command(), Some(ControlCommand::Stop));
    }

    #[test]
    fn test_decoder_coalesced_tokens() {
        let mut decoder = ControlDecoder::new();
        decoder.push(b"START_STREAMINGSTOP_STREAMING");
        assert_eq!(decoder.next_command(), Some(ControlCommand::Start));
        assert_eq!(decoder.next_command(), Some(ControlCommand::Stop));
        assert_eq!(decoder.next_command(), None);
    }

    #[test]
    fn test_decoder_unknown_then_known() {
        let mut decoder = ControlDecoder::new();
        decoder.push(b"HELLOSTOP_STREAMING");
        assert_eq!(
            decoder.next_command(),
            Some(ControlCommand::Unknown(Bytes::from_static(b"HELLO")))
        );
        assert_eq!(decoder.next_command(), Some(ControlCommand::Stop));
    }

    #[test]
    fn test_take_remainder_on_partial_token() {
        let mut decoder = ControlDecoder::new();
        decoder.push(b"STAR");
        assert_eq!(decoder.next_command(), None);
        assert_eq!(
            decoder.take_remainder(),
            Some(ControlCommand::Unknown(Bytes::from_static(b"STAR")))
        );
        assert_eq!(decoder.take_remainder(), None);
    }
}
