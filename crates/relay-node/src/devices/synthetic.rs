//! Hardware-free devices for the binary and for tests.

use media_protocol::frame::{FrameShape, VideoFrame};
use tracing::{debug, info};

use super::{CaptureBackend, CaptureDevice, DeviceInfo, OutputSink, SinkBackend};
use crate::errors::DeviceError;

/// Index of the only synthetic capture device.
pub const TEST_PATTERN_INDEX: u32 = 0;

/// Capture backend offering one device: a moving gradient.
#[derive(Debug, Clone)]
pub struct TestPatternBackend {
    shape: FrameShape,
    frame_limit: Option<u64>,
}

impl TestPatternBackend {
    #[must_use]
    pub fn new(shape: FrameShape) -> Self {
        Self {
            shape,
            frame_limit: None,
        }
    }

    /// End the stream after `limit` frames.
    #[must_use]
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }
}

#[async_trait::async_trait]
impl CaptureBackend for TestPatternBackend {
    fn list_candidate_devices(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            display_name: format!("Test pattern {}", self.shape),
            index: TEST_PATTERN_INDEX,
        }]
    }

    async fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if index != TEST_PATTERN_INDEX {
            return Err(DeviceError::CaptureUnavailable {
                index,
                reason: "only the test pattern device exists".to_string(),
            });
        }
        self.shape
            .validate()
            .map_err(|e| DeviceError::CaptureUnavailable {
                index,
                reason: e.to_string(),
            })?;
        Ok(Box::new(TestPatternCapture {
            shape: self.shape,
            frame_limit: self.frame_limit,
            produced: 0,
            closed: false,
        }))
    }
}

/// An open test pattern device.
#[derive(Debug)]
pub struct TestPatternCapture {
    shape: FrameShape,
    frame_limit: Option<u64>,
    produced: u64,
    closed: bool,
}

/// Gradient shifted by `offset`, so consecutive frames differ.
#[allow(clippy::cast_possible_truncation)] // wrapping byte pattern
fn gradient(shape: FrameShape, offset: u64) -> Result<VideoFrame, DeviceError> {
    let len = shape
        .pixel_len()
        .ok_or_else(|| DeviceError::CaptureRead(format!("{shape} overflows")))?;
    let shift = offset as u8;
    let width = shape.width as usize;
    let channels = usize::from(shape.channels);
    let pixels: Vec<u8> = (0..len)
        .map(|i| (((i / channels) % width) as u8).wrapping_add(shift))
        .collect();
    VideoFrame::new(shape, pixels).map_err(|e| DeviceError::CaptureRead(e.to_string()))
}

#[async_trait::async_trait]
impl CaptureDevice for TestPatternCapture {
    async fn read_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError> {
        if self.closed {
            return Err(DeviceError::CaptureRead("device is closed".to_string()));
        }
        if self.frame_limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        let frame = gradient(self.shape, self.produced)?;
        self.produced += 1;
        Ok(Some(frame))
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        if !self.closed {
            self.closed = true;
            debug!(target: "relay.session", frames = self.produced, "Test pattern closed");
        }
        Ok(())
    }
}

/// Sink backend that logs what it receives instead of displaying it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSinkBackend;

#[async_trait::async_trait]
impl SinkBackend for LoggingSinkBackend {
    async fn open(
        &self,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Box<dyn OutputSink>, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::SinkUnavailable(format!(
                "invalid output size {width}x{height}"
            )));
        }
        info!(
            target: "relay.session",
            width,
            height,
            frame_rate,
            "Output sink opened"
        );
        Ok(Box::new(LoggingSink {
            width,
            height,
            frame_rate,
            written: 0,
        }))
    }
}

/// An open logging sink.
#[derive(Debug)]
pub struct LoggingSink {
    width: u32,
    height: u32,
    frame_rate: u32,
    written: u64,
}

#[async_trait::async_trait]
impl OutputSink for LoggingSink {
    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), DeviceError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(DeviceError::SinkWrite(format!(
                "frame {} does not match output {}x{}",
                frame.shape(),
                self.width,
                self.height
            )));
        }
        self.written += 1;
        if self.written % u64::from(self.frame_rate.max(1)) == 0 {
            info!(target: "relay.session", frames = self.written, "Output sink receiving frames");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        info!(target: "relay.session", frames = self.written, "Output sink closed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pattern_lists_one_device() {
        let backend = TestPatternBackend::new(FrameShape::new(8, 4, 3));
        let devices = backend.list_candidate_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices.first().unwrap().index, TEST_PATTERN_INDEX);
        assert_eq!(devices.first().unwrap().to_string(), "[0] Test pattern 8x4x3");
    }

    #[tokio::test]
    async fn test_pattern_frames_match_shape_and_change() {
        let backend = TestPatternBackend::new(FrameShape::new(8, 4, 3));
        let mut device = backend.open(0).await.unwrap();

        let first = device.read_frame().await.unwrap().unwrap();
        let second = device.read_frame().await.unwrap().unwrap();
        assert_eq!(first.shape(), FrameShape::new(8, 4, 3));
        assert_eq!(first.pixels().len(), 96);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_pattern_unknown_index_is_unavailable() {
        let backend = TestPatternBackend::new(FrameShape::new(8, 4, 3));
        let err = backend.open(3).await.err().unwrap();
        assert!(matches!(err, DeviceError::CaptureUnavailable { index: 3, .. }));
    }

    #[tokio::test]
    async fn test_pattern_frame_limit_ends_stream() {
        let backend = TestPatternBackend::new(FrameShape::new(2, 2, 1)).with_frame_limit(2);
        let mut device = backend.open(0).await.unwrap();
        assert!(device.read_frame().await.unwrap().is_some());
        assert!(device.read_frame().await.unwrap().is_some());
        assert!(device.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_pattern_refuses_reads() {
        let backend = TestPatternBackend::new(FrameShape::new(2, 2, 1));
        let mut device = backend.open(0).await.unwrap();
        device.close().await.unwrap();
        assert!(matches!(
            device.read_frame().await,
            Err(DeviceError::CaptureRead(_))
        ));
    }

    #[tokio::test]
    async fn test_logging_sink_checks_dimensions() {
        let mut sink = LoggingSinkBackend.open(2, 2, 20).await.unwrap();
        let good = VideoFrame::new(FrameShape::new(2, 2, 3), vec![0u8; 12]).unwrap();
        let bad = VideoFrame::new(FrameShape::new(4, 2, 3), vec![0u8; 24]).unwrap();

        sink.write_frame(&good).await.unwrap();
        assert!(matches!(
            sink.write_frame(&bad).await,
            Err(DeviceError::SinkWrite(_))
        ));
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_logging_sink_rejects_empty_size() {
        assert!(matches!(
            LoggingSinkBackend.open(0, 480, 20).await.err().unwrap(),
            DeviceError::SinkUnavailable(_)
        ));
    }
}
