use std::fmt;

use anyhow::Error;
use image::RgbImage;
use thiserror::Error;

/// Raw frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("no frame received from {source_name} within {waited_ms} ms")]
    NoFirstFrame { source_name: String, waited_ms: u64 },
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("capture feed closed")]
    Closed,
    #[error(transparent)]
    Other(#[from] Error),
}

impl Frame {
    /// Number of bytes a packed three-channel frame of this size occupies.
    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }

    /// Wrap an RGB image, stamping it with the current wall-clock time.
    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            format: FrameFormat::Rgb8,
        }
    }

    /// Convert into an owned RGB image. The frame itself is left untouched.
    pub fn to_rgb_image(&self) -> Result<RgbImage, CaptureError> {
        let expected = Self::expected_len(self.width, self.height);
        if self.data.len() != expected {
            return Err(CaptureError::BufferSize {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        let rgb = match self.format {
            FrameFormat::Rgb8 => self.data.clone(),
            FrameFormat::Bgr8 => bgr_to_rgb(&self.data),
        };
        RgbImage::from_raw(self.width, self.height, rgb).ok_or(CaptureError::BufferSize {
            width: self.width,
            height: self.height,
            expected,
            actual: self.data.len(),
        })
    }
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}
