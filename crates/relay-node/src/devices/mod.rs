//! Capture and output device collaborators.
//!
//! The relay never touches camera or virtual-camera hardware directly. It
//! drives four narrow traits:
//!
//! - [`CaptureBackend`] enumerates and opens capture devices
//! - [`CaptureDevice`] produces raw frames until end of stream
//! - [`SinkBackend`] opens an output sink for a frame size and rate
//! - [`OutputSink`] consumes decoded frames
//!
//! [`synthetic`] provides a test-pattern capture and a logging sink so the
//! binary runs without hardware.

pub mod synthetic;

use std::fmt;
use std::time::Duration;

use media_protocol::frame::VideoFrame;
use tracing::{debug, info};

use crate::errors::DeviceError;

/// One entry in a device selection list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub display_name: String,
    pub index: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.display_name)
    }
}

/// Source of capture devices.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Devices an operator could pick from.
    fn list_candidate_devices(&self) -> Vec<DeviceInfo>;

    /// Open the device at `index`.
    async fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, DeviceError>;
}

/// An open capture device.
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    /// Next raw frame, or `None` at end of stream.
    async fn read_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError>;

    /// Release the device.
    async fn close(&mut self) -> Result<(), DeviceError>;
}

/// Source of output sinks.
#[async_trait::async_trait]
pub trait SinkBackend: Send + Sync {
    /// Open a sink for frames of `width` x `height` at `frame_rate`.
    async fn open(
        &self,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Box<dyn OutputSink>, DeviceError>;
}

/// An open output sink.
#[async_trait::async_trait]
pub trait OutputSink: Send {
    /// Consume one decoded frame.
    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), DeviceError>;

    /// Release the sink.
    async fn close(&mut self) -> Result<(), DeviceError>;
}

/// Open a capture device and give it `warmup` to settle.
///
/// # Errors
///
/// Returns the backend's error if the device cannot be opened.
pub async fn open_capture(
    backend: &dyn CaptureBackend,
    index: u32,
    warmup: Duration,
) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    let device = backend.open(index).await?;
    info!(target: "relay.session", index, "Capture device opened");
    if !warmup.is_zero() {
        debug!(
            target: "relay.session",
            warmup_ms = warmup.as_millis(),
            "Waiting for capture device to warm up"
        );
        tokio::time::sleep(warmup).await;
    }
    Ok(device)
}

/// Log the capture devices an operator could choose from.
pub fn log_candidate_devices(backend: &dyn CaptureBackend) {
    let devices = backend.list_candidate_devices();
    if devices.is_empty() {
        info!(target: "relay.session", "No capture devices found");
        return;
    }
    for device in &devices {
        info!(
            target: "relay.session",
            index = device.index,
            name = %device.display_name,
            "Capture device available"
        );
    }
}
