//! Relay node error types.
//!
//! Every error is sorted into an [`ErrorClass`], which decides what the
//! session orchestrator does with it: keep looping, tear the session down,
//! abandon a handshake attempt, or stop the node. Operator-facing text comes
//! from [`RelayError::status_message`]; full details stay in the logs.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use media_protocol::codec::CodecError;
use media_protocol::framing::FramingError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::session::phase::SessionPhase;

/// How a failure affects the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Logged; the current loop keeps going.
    Transient,
    /// Ends the session; the node loops back to discovery or advertising.
    ConnectionFatal,
    /// Aborts the handshake attempt; the node loops back.
    HandshakeFatal,
    /// Surfaced immediately; the node stops.
    ConfigurationFatal,
}

impl ErrorClass {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::ConnectionFatal => "connection_fatal",
            ErrorClass::HandshakeFatal => "handshake_fatal",
            ErrorClass::ConfigurationFatal => "configuration_fatal",
        }
    }
}

/// Which TCP channel an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Control,
    Data,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Channel::Control => "control",
            Channel::Data => "data",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture and output device failures.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The capture device could not be opened.
    #[error("Capture device {index} unavailable: {reason}")]
    CaptureUnavailable { index: u32, reason: String },

    /// Reading a frame from an open capture device failed.
    #[error("Capture read failed: {0}")]
    CaptureRead(String),

    /// The output sink could not be opened.
    #[error("Output sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Writing a frame to an open output sink failed.
    #[error("Output sink write failed: {0}")]
    SinkWrite(String),

    /// Closing a device failed.
    #[error("Device close failed: {0}")]
    Close(String),
}

impl DeviceError {
    /// A capture that cannot open stops the node. Sink failures and
    /// failures on an open device only end the session.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            DeviceError::CaptureUnavailable { .. } => ErrorClass::ConfigurationFatal,
            DeviceError::SinkUnavailable(_)
            | DeviceError::CaptureRead(_)
            | DeviceError::SinkWrite(_)
            | DeviceError::Close(_) => ErrorClass::ConnectionFatal,
        }
    }
}

/// Control handshake failures.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The control port refused or dropped the connection attempt.
    #[error("Could not reach producer at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The producer is serving another consumer.
    #[error("Producer is already streaming")]
    AlreadyStreaming,

    /// The reply to START was some other command.
    #[error("Unexpected reply to START: {0}")]
    UnexpectedReply(String),

    /// The producer closed the control channel without replying.
    #[error("Producer closed the control channel before replying")]
    NoReply,

    /// No reply arrived in time.
    #[error("No reply to START within {0:?}")]
    ReplyTimeout(Duration),

    /// The consumer never opened the data channel.
    #[error("Consumer did not open the data channel within {0:?}")]
    DataConnectTimeout(Duration),

    /// The consumer went away between the handshake and the data connection.
    #[error("Consumer abandoned the session before opening the data channel")]
    Abandoned,
}

/// Relay node error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A listening socket could not be bound.
    #[error("Failed to bind {what} socket on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Capture or output device failure.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Control handshake failure.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Read or write failure on an established channel.
    #[error("{channel} channel I/O failed: {source}")]
    Io {
        channel: Channel,
        #[source]
        source: io::Error,
    },

    /// Malformed or oversized frame on the data channel.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// A configured read deadline expired.
    #[error("{channel} channel read timed out after {timeout:?}")]
    ReadTimeout { channel: Channel, timeout: Duration },

    /// A discovery datagram could not be interpreted.
    #[error("Malformed discovery announcement: {0}")]
    Discovery(String),

    /// No announcement arrived within the listen timeout.
    #[error("No discovery announcement within {0:?}")]
    DiscoveryTimeout(Duration),

    /// A single presence broadcast failed.
    #[error("Broadcast send failed: {0}")]
    Broadcast(#[source] io::Error),

    /// The lifecycle refused a phase change.
    #[error("Illegal phase transition {from} -> {to}")]
    IllegalTransition { from: SessionPhase, to: SessionPhase },

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for RelayError {
    fn from(err: CodecError) -> Self {
        RelayError::Framing(FramingError::Codec(err))
    }
}

impl RelayError {
    /// Classify this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::Config(_) | RelayError::Bind { .. } => ErrorClass::ConfigurationFatal,
            RelayError::Device(e) => e.class(),
            RelayError::Handshake(_) => ErrorClass::HandshakeFatal,
            RelayError::Io { .. }
            | RelayError::Framing(_)
            | RelayError::ReadTimeout { .. }
            | RelayError::IllegalTransition { .. }
            | RelayError::Internal(_) => ErrorClass::ConnectionFatal,
            RelayError::Discovery(_)
            | RelayError::DiscoveryTimeout(_)
            | RelayError::Broadcast(_) => ErrorClass::Transient,
        }
    }

    /// Whether this error should stop the node.
    #[must_use]
    pub fn is_fatal_to_node(&self) -> bool {
        self.class() == ErrorClass::ConfigurationFatal
    }

    /// Text safe to show an operator.
    ///
    /// Socket errors and device internals are kept out; they are logged
    /// where the error is handled.
    #[must_use]
    pub fn status_message(&self) -> String {
        match self {
            RelayError::Config(_) => "Invalid configuration".to_string(),
            RelayError::Bind { what, addr, .. } => {
                format!("Could not open {what} port {}", addr.port())
            }
            RelayError::Device(DeviceError::CaptureUnavailable { index, .. }) => {
                format!("Capture device {index} is not available")
            }
            RelayError::Device(DeviceError::SinkUnavailable(_)) => {
                "Output device is not available".to_string()
            }
            RelayError::Device(_) => "Video device failed".to_string(),
            RelayError::Handshake(HandshakeError::AlreadyStreaming) => {
                "Server is already streaming to another client".to_string()
            }
            RelayError::Handshake(HandshakeError::Connect { addr, .. }) => {
                format!("Could not connect to {}", addr.ip())
            }
            RelayError::Handshake(_) => "Could not start streaming".to_string(),
            RelayError::Io { channel, .. } => format!("Connection lost ({channel} channel)"),
            RelayError::Framing(_) => "Received corrupt video data".to_string(),
            RelayError::ReadTimeout { .. } => "Peer stopped responding".to_string(),
            RelayError::Discovery(_) | RelayError::DiscoveryTimeout(_) => {
                "Searching for server...".to_string()
            }
            RelayError::Broadcast(_) => "Could not announce server".to_string(),
            RelayError::IllegalTransition { .. } | RelayError::Internal(_) => {
                "Internal error".to_string()
            }
        }
    }
}
