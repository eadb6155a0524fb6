//! Scripted capture backend.
//!
//! Plays a fixed list of frames, then ends the stream (or holds it open),
//! and counts every open and close so tests can check that each device is
//! released exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_test_utils::MockCaptureBackend;
//!
//! let capture = MockCaptureBackend::builder()
//!     .frames(frames)
//!     .fail_read_after(2)
//!     .build();
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use media_protocol::frame::VideoFrame;
use relay_node::devices::{CaptureBackend, CaptureDevice, DeviceInfo};
use relay_node::errors::DeviceError;

/// Capture backend double.
#[derive(Debug, Clone, Default)]
pub struct MockCaptureBackend {
    frames: Vec<VideoFrame>,
    hold_after_frames: bool,
    fail_open: bool,
    fail_read_after: Option<usize>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockCaptureBackend {
    /// Create a new MockCaptureBackend builder.
    #[must_use]
    pub fn builder() -> MockCaptureBackendBuilder {
        MockCaptureBackendBuilder::default()
    }

    /// Number of devices opened so far.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of devices closed so far.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MockCaptureBackend {
    fn list_candidate_devices(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            display_name: "Scripted camera".to_string(),
            index: 0,
        }]
    }

    async fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if self.fail_open {
            return Err(DeviceError::CaptureUnavailable {
                index,
                reason: "scripted open failure".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCapture {
            frames: self.frames.clone().into_iter(),
            hold_after_frames: self.hold_after_frames,
            fail_read_after: self.fail_read_after,
            delivered: 0,
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// One opened scripted device.
#[derive(Debug)]
pub struct ScriptedCapture {
    frames: std::vec::IntoIter<VideoFrame>,
    hold_after_frames: bool,
    fail_read_after: Option<usize>,
    delivered: usize,
    closes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl CaptureDevice for ScriptedCapture {
    async fn read_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError> {
        if self.fail_read_after == Some(self.delivered) {
            return Err(DeviceError::CaptureRead("scripted read failure".to_string()));
        }
        match self.frames.next() {
            Some(frame) => {
                self.delivered += 1;
                Ok(Some(frame))
            }
            None if self.hold_after_frames => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builder for MockCaptureBackend configuration.
#[derive(Debug, Default)]
pub struct MockCaptureBackendBuilder {
    frames: Vec<VideoFrame>,
    hold_after_frames: bool,
    fail_open: bool,
    fail_read_after: Option<usize>,
}

impl MockCaptureBackendBuilder {
    /// Frames every opened device plays, in order.
    #[must_use]
    pub fn frames(mut self, frames: impl IntoIterator<Item = VideoFrame>) -> Self {
        self.frames = frames.into_iter().collect();
        self
    }

    /// Keep the stream open after the last frame instead of ending it.
    #[must_use]
    pub fn then_hold(mut self) -> Self {
        self.hold_after_frames = true;
        self
    }

    /// Refuse to open any device.
    #[must_use]
    pub fn fail_on_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fail the read after `count` frames were delivered.
    #[must_use]
    pub fn fail_read_after(mut self, count: usize) -> Self {
        self.fail_read_after = Some(count);
        self
    }

    /// Build the MockCaptureBackend.
    #[must_use]
    pub fn build(self) -> MockCaptureBackend {
        MockCaptureBackend {
            frames: self.frames,
            hold_after_frames: self.hold_after_frames,
            fail_open: self.fail_open,
            fail_read_after: self.fail_read_after,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}
