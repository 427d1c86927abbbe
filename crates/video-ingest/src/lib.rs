//! Frame acquisition for the tripline controller.
//!
//! Sources implement [`FrameSource`]; [`spawn_reader`] moves one onto a
//! background thread and exposes the most recent frame through a
//! [`FrameFeed`].

#[cfg(feature = "with-opencv")]
mod camera;
mod feed;
pub mod latest;
mod synthetic;
mod types;

#[cfg(feature = "with-opencv")]
pub use camera::{CameraSettings, OpenCvCamera};
pub use feed::{Acquisition, FrameFeed, spawn_reader};
pub use synthetic::{SyntheticScene, SyntheticSource};
pub use types::{CaptureError, Frame, FrameFormat};

/// Anything that can hand out frames one at a time.
pub trait FrameSource: Send {
    /// Human-readable name used in logs.
    fn describe(&self) -> String;

    /// Read the next frame. `Ok(None)` is a transient miss the caller retries.
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;
}
