use thiserror::Error;

/// Rejected configuration values. These are caught at construction time and
/// never surface from a running loop.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("trigger line fraction must lie in [0, 1], got {0}")]
    LineFraction(f32),
    #[error("frame width must be positive")]
    FrameWidth,
    #[error("cooldown must be a positive, finite number of seconds, got {0}")]
    Cooldown(f64),
    #[error("unknown crossing polarity {0:?} (expected left-to-right or right-to-left)")]
    Polarity(String),
    #[error("invalid HSV range: lower {lower:?} exceeds upper {upper:?}")]
    HsvRange { lower: [u8; 3], upper: [u8; 3] },
}
