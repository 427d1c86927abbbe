//! Configuration for the controller.
//!
//! CLI flags are parsed with clap, optionally layered over a TOML file, and
//! validated once into a `ControllerConfig` that the loop uses without
//! re-parsing anything.

use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, ValueEnum};
use serde::Deserialize;
use trigger_core::{ColorBlobDetector, CooldownState, HsvRange, Polarity};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;
pub const DEFAULT_LINE_FRACTION: f32 = 0.75;
pub const DEFAULT_COOLDOWN_SECS: f64 = 3.0;
pub const DEFAULT_FPS: f32 = 30.0;

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Built-in moving green disc, no hardware required.
    Synthetic,
    /// Camera device index or capture URI, opened through OpenCV.
    Camera(String),
}

impl SourceSpec {
    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("--source must not be empty");
        }
        if raw.eq_ignore_ascii_case("synthetic") {
            Ok(SourceSpec::Synthetic)
        } else {
            Ok(SourceSpec::Camera(raw.to_string()))
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Log servo moves instead of driving hardware.
    #[default]
    Sim,
    /// Linux sysfs PWM channel.
    Pwm,
}

/// Detector tuning. Defaults select green targets.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorOptions {
    pub range: HsvRange,
    pub min_area: f64,
    pub min_circularity: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            range: HsvRange::green(),
            min_area: 100.0,
            min_circularity: 0.7,
        }
    }
}

impl DetectorOptions {
    pub fn build(&self) -> ColorBlobDetector {
        ColorBlobDetector::new(self.range)
            .with_min_area(self.min_area)
            .with_min_circularity(self.min_circularity)
    }
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub source: SourceSpec,
    pub width: u32,
    pub height: u32,
    pub first_frame_timeout: Duration,
    pub warmup_frames: u32,
    pub line_fraction: f32,
    pub cooldown: Duration,
    pub polarity: Polarity,
    pub fps: f32,
    pub stream_addr: SocketAddr,
    pub jpeg_quality: u8,
    pub accept_wait: Duration,
    pub send_timeout: Duration,
    pub actuator: ActuatorKind,
    pub pwm_chip: u32,
    pub pwm_channel: u32,
    pub hold: Duration,
    pub detector: DetectorOptions,
    pub metrics_addr: Option<SocketAddr>,
}

impl ControllerConfig {
    /// Wall-clock budget for one tick.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.fps)
    }
}

/// CLI arguments accepted by `tripline`.
#[derive(Debug, Default, Args)]
pub struct ControllerCliArgs {
    /// TOML file with defaults; flags given on the command line win.
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Camera index, capture URI, or `synthetic`.
    #[arg(long = "source", value_name = "SOURCE")]
    pub source: Option<String>,
    /// Requested capture width in pixels.
    #[arg(long = "width", value_name = "PX")]
    pub width: Option<u32>,
    /// Requested capture height in pixels.
    #[arg(long = "height", value_name = "PX")]
    pub height: Option<u32>,
    /// Give up if no frame arrives within this many milliseconds of start.
    #[arg(long = "first-frame-timeout-ms", value_name = "MS")]
    pub first_frame_timeout_ms: Option<u64>,
    /// Frames discarded after opening the camera.
    #[arg(long = "warmup-frames", value_name = "N")]
    pub warmup_frames: Option<u32>,
    /// Trigger line position as a fraction of the frame width.
    #[arg(long = "line", value_name = "FRACTION")]
    pub line_fraction: Option<f32>,
    /// Minimum seconds between two fires.
    #[arg(long = "cooldown", value_name = "SECS")]
    pub cooldown_secs: Option<f64>,
    /// Crossing direction: left-to-right or right-to-left.
    #[arg(long = "polarity", value_name = "DIR")]
    pub polarity: Option<String>,
    /// Target control loop rate.
    #[arg(long = "fps", value_name = "HZ")]
    pub fps: Option<f32>,
    /// Address the preview stream listens on.
    #[arg(long = "host", value_name = "IP")]
    pub host: Option<IpAddr>,
    /// TCP port of the preview stream.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,
    /// JPEG quality of streamed frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,
    /// Longest wait for a viewer per stream step.
    #[arg(long = "accept-wait-ms", value_name = "MS")]
    pub accept_wait_ms: Option<u64>,
    /// Drop the viewer if one frame takes longer than this to send.
    #[arg(long = "send-timeout-ms", value_name = "MS")]
    pub send_timeout_ms: Option<u64>,
    /// Actuator backend.
    #[arg(long = "actuator", value_enum)]
    pub actuator: Option<ActuatorKind>,
    /// sysfs PWM chip number.
    #[arg(long = "pwm-chip", value_name = "N")]
    pub pwm_chip: Option<u32>,
    /// sysfs PWM channel number.
    #[arg(long = "pwm-channel", value_name = "N")]
    pub pwm_channel: Option<u32>,
    /// How long the servo stays extended per fire.
    #[arg(long = "hold-ms", value_name = "MS")]
    pub hold_ms: Option<u64>,
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-addr", value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// On-disk configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub source: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub first_frame_timeout_ms: Option<u64>,
    pub warmup_frames: Option<u32>,
    #[serde(default)]
    pub trigger: TriggerSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub actuator: ActuatorSection,
    #[serde(default)]
    pub detector: DetectorSection,
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSection {
    pub line: Option<f32>,
    pub cooldown_secs: Option<f64>,
    pub polarity: Option<Polarity>,
    pub fps: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSection {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub jpeg_quality: Option<u8>,
    pub accept_wait_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuatorSection {
    pub kind: Option<ActuatorKind>,
    pub pwm_chip: Option<u32>,
    pub pwm_channel: Option<u32>,
    pub hold_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorSection {
    pub hsv_lower: Option<[u8; 3]>,
    pub hsv_upper: Option<[u8; 3]>,
    pub min_area: Option<f64>,
    pub min_circularity: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

impl TryFrom<ControllerCliArgs> for ControllerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ControllerCliArgs) -> Result<Self> {
        let file = match args.config.as_deref() {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }
}

impl ControllerConfig {
    /// Combine CLI flags with file values (flags win) and validate.
    pub fn merge(args: ControllerCliArgs, file: FileConfig) -> Result<Self> {
        let source = SourceSpec::parse(
            args.source
                .as_deref()
                .or(file.source.as_deref())
                .unwrap_or("0"),
        )?;

        let width = args.width.or(file.width).unwrap_or(640);
        let height = args.height.or(file.height).unwrap_or(480);
        if width == 0 || height == 0 {
            bail!("Capture width and height must be positive integers");
        }

        let first_frame_timeout_ms = args
            .first_frame_timeout_ms
            .or(file.first_frame_timeout_ms)
            .unwrap_or(5_000);
        if first_frame_timeout_ms == 0 {
            bail!("--first-frame-timeout-ms must be at least 1");
        }
        let warmup_frames = args.warmup_frames.or(file.warmup_frames).unwrap_or(10);

        let line_fraction = args
            .line_fraction
            .or(file.trigger.line)
            .unwrap_or(DEFAULT_LINE_FRACTION);
        if !(0.0..=1.0).contains(&line_fraction) {
            bail!("--line must lie in [0, 1], got {line_fraction}");
        }

        let cooldown_secs = args
            .cooldown_secs
            .or(file.trigger.cooldown_secs)
            .unwrap_or(DEFAULT_COOLDOWN_SECS);
        let cooldown = CooldownState::from_secs_f64(cooldown_secs)?.cooldown();

        let polarity = match args.polarity.as_deref() {
            Some(raw) => raw.parse::<Polarity>()?,
            None => file.trigger.polarity.unwrap_or_default(),
        };

        let fps = args.fps.or(file.trigger.fps).unwrap_or(DEFAULT_FPS);
        if !fps.is_finite() || fps <= 0.0 || fps > 1_000.0 {
            bail!("--fps must be in (0, 1000], got {fps}");
        }

        let host = args
            .host
            .or(file.stream.host)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = args.port.or(file.stream.port).unwrap_or(DEFAULT_PORT);

        let jpeg_quality = args
            .jpeg_quality
            .or(file.stream.jpeg_quality)
            .unwrap_or(DEFAULT_JPEG_QUALITY);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let accept_wait_ms = args
            .accept_wait_ms
            .or(file.stream.accept_wait_ms)
            .unwrap_or(10);
        let send_timeout_ms = args
            .send_timeout_ms
            .or(file.stream.send_timeout_ms)
            .unwrap_or(1_000);
        if send_timeout_ms == 0 {
            bail!("--send-timeout-ms must be at least 1");
        }

        let actuator = args.actuator.or(file.actuator.kind).unwrap_or_default();
        let pwm_chip = args.pwm_chip.or(file.actuator.pwm_chip).unwrap_or(0);
        let pwm_channel = args.pwm_channel.or(file.actuator.pwm_channel).unwrap_or(0);
        let hold_ms = args.hold_ms.or(file.actuator.hold_ms).unwrap_or(500);

        let defaults = DetectorOptions::default();
        let range = HsvRange::new(
            file.detector.hsv_lower.unwrap_or(defaults.range.lower),
            file.detector.hsv_upper.unwrap_or(defaults.range.upper),
        )?;
        let min_area = file.detector.min_area.unwrap_or(defaults.min_area);
        let min_circularity = file
            .detector
            .min_circularity
            .unwrap_or(defaults.min_circularity);
        if min_area.is_nan() || min_area < 0.0 {
            bail!("detector.min_area must be non-negative");
        }
        if !(0.0..=1.0).contains(&min_circularity) {
            bail!("detector.min_circularity must lie in [0, 1]");
        }

        let metrics_addr = args.metrics_addr.or(file.metrics_addr);
        if let Some(addr) = metrics_addr {
            if addr.port() == port && addr.ip() == host {
                return Err(anyhow!(
                    "metrics address {addr} collides with the stream listener"
                ));
            }
        }

        Ok(Self {
            source,
            width,
            height,
            first_frame_timeout: Duration::from_millis(first_frame_timeout_ms),
            warmup_frames,
            line_fraction,
            cooldown,
            polarity,
            fps,
            stream_addr: SocketAddr::new(host, port),
            jpeg_quality,
            accept_wait: Duration::from_millis(accept_wait_ms),
            send_timeout: Duration::from_millis(send_timeout_ms),
            actuator,
            pwm_chip,
            pwm_channel,
            hold: Duration::from_millis(hold_ms),
            detector: DetectorOptions {
                range,
                min_area,
                min_circularity,
            },
            metrics_addr,
        })
    }
}
