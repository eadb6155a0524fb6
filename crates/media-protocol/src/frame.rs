//! Raw video frame type.

use bytes::Bytes;

use crate::codec::CodecError;

/// Shape of a raw frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Interleaved channels per pixel (1 = gray, 3 = BGR, 4 = BGRA)
    pub channels: u8,
}

impl FrameShape {
    /// Largest channel count a frame may carry.
    pub const MAX_CHANNELS: u8 = 4;

    /// Create a new shape.
    #[must_use]
    pub const fn new(width: u32, height: u32, channels: u8) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of pixel bytes a buffer of this shape must hold.
    ///
    /// Returns `None` if the product overflows `usize`.
    #[must_use]
    pub fn pixel_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(usize::from(self.channels))
    }

    /// Check the shape is usable: non-zero dimensions, 1..=4 channels.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidShape`] describing the first problem found.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidShape(format!(
                "zero dimension {}x{}",
                self.width, self.height
            )));
        }
        if self.channels == 0 || self.channels > Self::MAX_CHANNELS {
            return Err(CodecError::InvalidShape(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if self.pixel_len().is_none() {
            return Err(CodecError::InvalidShape(format!(
                "{}x{}x{} overflows",
                self.width, self.height, self.channels
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for FrameShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// A raw, uncompressed video frame.
///
/// Pixels are stored row-major with interleaved channels, exactly as a
/// capture device hands them out. The buffer length always equals
/// `width * height * channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    shape: FrameShape,
    pixels: Bytes,
}

impl VideoFrame {
    /// Build a frame, checking that the buffer matches the shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape is invalid or the buffer length differs
    /// from `width * height * channels`.
    pub fn new(shape: FrameShape, pixels: impl Into<Bytes>) -> Result<Self, CodecError> {
        shape.validate()?;
        let pixels = pixels.into();
        let expected = shape.pixel_len().unwrap_or(usize::MAX);
        if pixels.len() != expected {
            return Err(CodecError::PixelLengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self { shape, pixels })
    }

    /// Frame shape.
    #[must_use]
    pub const fn shape(&self) -> FrameShape {
        self.shape
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.shape.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.shape.height
    }

    /// Channels per pixel.
    #[must_use]
    pub const fn channels(&self) -> u8 {
        self.shape.channels
    }

    /// Raw pixel bytes.
    #[must_use]
    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// Consume the frame, returning its pixel buffer.
    #[must_use]
    pub fn into_pixels(self) -> Bytes {
        self.pixels
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_matching_buffer() {
        let frame = VideoFrame::new(FrameShape::new(4, 2, 3), vec![7u8; 24]).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.pixels().len(), 24);
    }

    #[test]
    fn test_new_rejects_short_buffer() {
        let err = VideoFrame::new(FrameShape::new(4, 2, 3), vec![0u8; 23]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::PixelLengthMismatch {
                expected: 24,
                actual: 23
            }
        ));
    }

    #[test]
    fn test_shape_validation() {
        assert!(FrameShape::new(0, 10, 3).validate().is_err());
        assert!(FrameShape::new(10, 0, 3).validate().is_err());
        assert!(FrameShape::new(10, 10, 0).validate().is_err());
        assert!(FrameShape::new(10, 10, 5).validate().is_err());
        assert!(FrameShape::new(640, 480, 3).validate().is_ok());
        assert_eq!(FrameShape::new(640, 480, 3).to_string(), "640x480x3");
    }
}
