//! One connection's worth of frame reading.

use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use anyhow::{Context, Result};
use frame_wire::read_frame;
use image::{DynamicImage, ImageFormat};
use tracing::{info, warn};

#[derive(Clone, Debug, Default)]
pub(crate) struct SessionOptions {
    /// Overwrite this file with every Nth decoded frame.
    pub(crate) snapshot: Option<PathBuf>,
    pub(crate) snapshot_every: u64,
    /// Stop after this many frames across all sessions.
    pub(crate) max_frames: Option<u64>,
    pub(crate) log_every: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Server closed the connection between frames.
    PeerClosed,
    Stopped,
    LimitReached,
}

#[derive(Debug)]
pub(crate) struct FrameStats {
    pub(crate) frames: u64,
    pub(crate) undecodable: u64,
    pub(crate) bytes: u64,
    pub(crate) last_size: Option<(u32, u32)>,
    started: Instant,
}

impl FrameStats {
    pub(crate) fn new() -> Self {
        Self {
            frames: 0,
            undecodable: 0,
            bytes: 0,
            last_size: None,
            started: Instant::now(),
        }
    }

    pub(crate) fn fps(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Read frames until the peer closes, `stop` is raised, or the frame limit is
/// hit. Protocol errors end the session with an error.
pub(crate) fn run_session<R: Read>(
    reader: &mut R,
    options: &SessionOptions,
    stop: &AtomicBool,
    stats: &mut FrameStats,
) -> Result<SessionEnd> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(SessionEnd::Stopped);
        }
        if options.max_frames.is_some_and(|max| stats.frames >= max) {
            return Ok(SessionEnd::LimitReached);
        }
        let frame = read_frame(reader);
        // A stop closes the socket under a blocked read; whatever that read
        // returned is not a server fault.
        if stop.load(Ordering::Relaxed) {
            return Ok(SessionEnd::Stopped);
        }
        let Some(payload) = frame.context("stream protocol error")? else {
            return Ok(SessionEnd::PeerClosed);
        };
        stats.bytes += payload.len() as u64;

        let image = match image::load_from_memory_with_format(&payload, ImageFormat::Jpeg) {
            Ok(image) => image,
            Err(err) => {
                stats.undecodable += 1;
                warn!("skipping undecodable frame ({} bytes): {err}", payload.len());
                continue;
            }
        };
        stats.frames += 1;
        stats.last_size = Some((image.width(), image.height()));

        if let Some(path) = &options.snapshot {
            if options.snapshot_every > 0 && stats.frames % options.snapshot_every == 0 {
                save_snapshot(&image, path)?;
            }
        }
        if options.log_every > 0 && stats.frames % options.log_every == 0 {
            info!(
                frames = stats.frames,
                fps = stats.fps(),
                "{}x{} frames",
                image.width(),
                image.height()
            );
        }
    }
}

fn save_snapshot(image: &DynamicImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use frame_wire::write_frame;
    use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};

    use super::*;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([0, 180, 0]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .encode_image(&image)
            .unwrap();
        out
    }

    fn stream_of(payloads: &[Vec<u8>]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        for payload in payloads {
            write_frame(&mut buf, payload).unwrap();
        }
        Cursor::new(buf)
    }

    #[test]
    fn reads_until_the_peer_closes() {
        let mut stream = stream_of(&[jpeg(32, 24), b"not a jpeg".to_vec(), jpeg(32, 24)]);
        let mut stats = FrameStats::new();
        let end = run_session(
            &mut stream,
            &SessionOptions::default(),
            &AtomicBool::new(false),
            &mut stats,
        )
        .unwrap();
        assert_eq!(end, SessionEnd::PeerClosed);
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.undecodable, 1);
        assert_eq!(stats.last_size, Some((32, 24)));
    }

    #[test]
    fn frame_limit_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let mut stream = stream_of(&[jpeg(16, 8), jpeg(16, 8), jpeg(16, 8)]);
        let options = SessionOptions {
            snapshot: Some(path.clone()),
            snapshot_every: 1,
            max_frames: Some(2),
            log_every: 0,
        };
        let mut stats = FrameStats::new();
        let end = run_session(&mut stream, &options, &AtomicBool::new(false), &mut stats).unwrap();
        assert_eq!(end, SessionEnd::LimitReached);
        assert_eq!(stats.frames, 2);
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (16, 8));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut bytes = stream_of(&[jpeg(16, 8)]).into_inner();
        bytes.truncate(bytes.len() - 5);
        let result = run_session(
            &mut Cursor::new(bytes),
            &SessionOptions::default(),
            &AtomicBool::new(false),
            &mut FrameStats::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn raised_stop_flag_ends_the_session() {
        let mut stream = stream_of(&[jpeg(16, 8)]);
        let end = run_session(
            &mut stream,
            &SessionOptions::default(),
            &AtomicBool::new(true),
            &mut FrameStats::new(),
        )
        .unwrap();
        assert_eq!(end, SessionEnd::Stopped);
    }
}
