//! OpenCV-backed camera source.

use std::{thread, time::Duration};

use anyhow::anyhow;
use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, info, warn};

use crate::{CaptureError, Frame, FrameFormat, FrameSource};

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frames grabbed and discarded after opening so stale buffers are flushed.
    pub warmup_frames: u32,
    /// Driver-side queue depth; 1 keeps reads close to live.
    pub buffer_frames: u32,
}

const WARMUP_INTERVAL: Duration = Duration::from_millis(50);

pub struct OpenCvCamera {
    cap: VideoCapture,
    settings: CameraSettings,
    frame: Mat,
    scratch: Mat,
}

impl OpenCvCamera {
    pub fn open(settings: CameraSettings) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(&settings.uri)?;
        settings.apply(&mut cap);
        info!(
            "opened camera {} (requested {}x{} @ {:.0} fps)",
            settings.uri, settings.width, settings.height, settings.fps
        );
        settings.warm_up(&mut cap);
        Ok(Self {
            cap,
            settings,
            frame: Mat::default(),
            scratch: Mat::default(),
        })
    }
}

impl FrameSource for OpenCvCamera {
    fn describe(&self) -> String {
        format!("camera {}", self.settings.uri)
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let grabbed = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed {
            return Ok(None);
        }

        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 || size.height <= 0 {
            return Ok(None);
        }

        let target_w = self.settings.width as i32;
        let target_h = self.settings.height as i32;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();
        let expected = Frame::expected_len(self.settings.width, self.settings.height);
        if data.len() != expected {
            return Err(CaptureError::Other(anyhow!(
                "camera delivered {} bytes, expected {expected} for BGR {}x{}",
                data.len(),
                self.settings.width,
                self.settings.height
            )));
        }

        Ok(Some(Frame {
            data,
            width: self.settings.width,
            height: self.settings.height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }))
    }
}

/// Device index for `N` or `/dev/videoN`; anything else is treated as a path
/// or stream URL.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    let digits = uri.strip_prefix("/dev/video").unwrap_or(uri);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// V4L2 first, then whatever backend OpenCV picks.
const BACKENDS: [i32; 2] = [videoio::CAP_V4L2, videoio::CAP_ANY];

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    let index = parse_device_index(uri);
    for backend in BACKENDS {
        let attempt = match index {
            Some(index) => VideoCapture::new(index, backend),
            None => VideoCapture::from_file(uri, backend),
        };
        match attempt {
            Ok(cap) if cap.is_opened().unwrap_or(false) => return Ok(cap),
            Ok(_) => debug!(uri, backend, "capture backend did not open the source"),
            Err(err) => warn!(uri, backend, error = %err, "capture backend failed"),
        }
    }
    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

impl CameraSettings {
    /// Push the requested format onto an open capture. Drivers silently ignore
    /// properties they do not support, so the result is only logged.
    fn apply(&self, cap: &mut VideoCapture) {
        let fourcc = [('M', 'J', 'P', 'G'), ('Y', 'U', 'Y', 'V')]
            .into_iter()
            .find(|&(a, b, c, d)| {
                videoio::VideoWriter::fourcc(a, b, c, d)
                    .and_then(|code| cap.set(videoio::CAP_PROP_FOURCC, code as f64))
                    .unwrap_or(false)
            });
        let properties = [
            (videoio::CAP_PROP_FRAME_WIDTH, self.width as f64),
            (videoio::CAP_PROP_FRAME_HEIGHT, self.height as f64),
            (videoio::CAP_PROP_FPS, self.fps),
            (videoio::CAP_PROP_BUFFERSIZE, self.buffer_frames as f64),
        ];
        let rejected = properties
            .iter()
            .filter(|&&(prop, value)| !cap.set(prop, value).unwrap_or(false))
            .count();
        debug!(?fourcc, rejected, "applied capture settings");
    }

    /// Grab and discard `warmup_frames` so exposure settles and stale driver
    /// buffers are flushed.
    fn warm_up(&self, cap: &mut VideoCapture) {
        if self.warmup_frames == 0 {
            return;
        }
        debug!("flushing {} warm-up frame(s)", self.warmup_frames);
        for _ in 0..self.warmup_frames {
            let _ = cap.grab();
            thread::sleep(WARMUP_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_device_index;

    #[test]
    fn device_indices_are_recognised() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("rtsp://cam/stream"), None);
        assert_eq!(parse_device_index("/dev/video-1"), None);
        assert_eq!(parse_device_index("video.mp4"), None);
    }
}
