//! Recording output sink backend.
//!
//! Keeps every frame written to any sink it opened, in write order, and
//! counts opens and closes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use media_protocol::frame::VideoFrame;
use relay_node::devices::{OutputSink, SinkBackend};
use relay_node::errors::DeviceError;

#[derive(Debug, Default)]
struct Recording {
    frames: Vec<VideoFrame>,
    opened: Vec<(u32, u32, u32)>,
    closes: usize,
}

/// Sink backend double that records what it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSinkBackend {
    fail_open: bool,
    recording: Arc<Mutex<Recording>>,
}

impl RecordingSinkBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose `open` always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Frames written so far, across all sinks.
    #[must_use]
    pub fn frames(&self) -> Vec<VideoFrame> {
        self.recording.lock().unwrap().frames.clone()
    }

    /// `(width, height, frame_rate)` of every sink opened.
    #[must_use]
    pub fn opened(&self) -> Vec<(u32, u32, u32)> {
        self.recording.lock().unwrap().opened.clone()
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.recording.lock().unwrap().closes
    }

    /// Wait until at least `count` frames were written.
    ///
    /// # Errors
    ///
    /// Fails if `timeout` passes first.
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> Result<Vec<VideoFrame>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frames = self.frames();
            if frames.len() >= count {
                return Ok(frames);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("expected {count} frames within {timeout:?}, got {}", frames.len());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait::async_trait]
impl SinkBackend for RecordingSinkBackend {
    async fn open(
        &self,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Box<dyn OutputSink>, DeviceError> {
        if self.fail_open {
            return Err(DeviceError::SinkUnavailable(
                "scripted open failure".to_string(),
            ));
        }
        self.recording
            .lock()
            .unwrap()
            .opened
            .push((width, height, frame_rate));
        Ok(Box::new(RecordingSink {
            recording: Arc::clone(&self.recording),
        }))
    }
}

/// One opened recording sink.
#[derive(Debug)]
pub struct RecordingSink {
    recording: Arc<Mutex<Recording>>,
}

#[async_trait::async_trait]
impl OutputSink for RecordingSink {
    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), DeviceError> {
        self.recording.lock().unwrap().frames.push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.recording.lock().unwrap().closes += 1;
        Ok(())
    }
}
