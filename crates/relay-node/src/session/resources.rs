//! Per-session resource set.
//!
//! Everything a session acquires is parked here as it is acquired, so a
//! single [`SessionResources::release`] call tears down whatever exists on
//! every exit path, no matter how far setup got.

use std::io;

use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::control::ControlChannel;
use crate::devices::{CaptureDevice, OutputSink};
use crate::transport::{FrameReceiver, FrameSender};

/// The data channel in whichever direction this node uses it.
#[derive(Debug)]
pub enum DataLink {
    Sending(FrameSender<TcpStream>),
    Receiving(FrameReceiver<TcpStream>),
}

impl DataLink {
    /// Half-close the data connection.
    ///
    /// # Errors
    ///
    /// Returns the socket error, if any.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            DataLink::Sending(sender) => sender.shutdown().await,
            DataLink::Receiving(receiver) => receiver.shutdown().await,
        }
    }
}

/// What a release pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Resources that were held and are now gone.
    pub released: usize,
    /// Of those, how many reported an error while closing.
    pub failed: usize,
}

/// Resources held by one session.
pub struct SessionResources {
    pub session_id: Uuid,
    pub control: Option<ControlChannel>,
    pub data: Option<DataLink>,
    pub capture: Option<Box<dyn CaptureDevice>>,
    pub sink: Option<Box<dyn OutputSink>>,
}

impl std::fmt::Debug for SessionResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResources")
            .field("session_id", &self.session_id)
            .field("control", &self.control.is_some())
            .field("data", &self.data.is_some())
            .field("capture", &self.capture.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for SessionResources {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionResources {
    /// An empty set with a fresh session id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            control: None,
            data: None,
            capture: None,
            sink: None,
        }
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.control.is_none() && self.data.is_none() && self.capture.is_none() && self.sink.is_none()
    }

    /// Release everything held: transport, control, capture, then sink.
    ///
    /// Every release is attempted even if an earlier one fails. Calling
    /// this again releases nothing.
    pub async fn release(&mut self) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();

        if let Some(mut data) = self.data.take() {
            summary.released += 1;
            if let Err(e) = data.shutdown().await {
                summary.failed += 1;
                debug!(target: "relay.session", session_id = %self.session_id, error = %e, "Data channel close failed");
            }
        }

        if let Some(mut control) = self.control.take() {
            summary.released += 1;
            if let Err(e) = control.shutdown().await {
                summary.failed += 1;
                debug!(target: "relay.session", session_id = %self.session_id, error = %e, "Control channel close failed");
            }
        }

        if let Some(mut capture) = self.capture.take() {
            summary.released += 1;
            if let Err(e) = capture.close().await {
                summary.failed += 1;
                warn!(target: "relay.session", session_id = %self.session_id, error = %e, "Capture device close failed");
            }
        }

        if let Some(mut sink) = self.sink.take() {
            summary.released += 1;
            if let Err(e) = sink.close().await {
                summary.failed += 1;
                warn!(target: "relay.session", session_id = %self.session_id, error = %e, "Output sink close failed");
            }
        }

        if summary.released > 0 {
            debug!(
                target: "relay.session",
                session_id = %self.session_id,
                released = summary.released,
                failed = summary.failed,
                "Session resources released"
            );
        }
        summary
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        if !self.is_empty() {
            warn!(
                target: "relay.session",
                session_id = %self.session_id,
                "Session resources dropped without release"
            );
        }
    }
}
