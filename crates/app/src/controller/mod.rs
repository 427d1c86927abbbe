//! Closed-loop trigger controller: capture, decide, actuate, and stream.
//!
//! - `config`: CLI/TOML configuration and validation.
//! - `engine`: per-tick detect → cross → arbitrate → actuate logic.
//! - `pipeline`: process wiring, pacing, and shutdown.
//! - `annotation`: overlay drawing and JPEG encoding.
//! - `server`: single-viewer TCP stream server.
//! - `streaming`: stream worker thread behind a latest-only handoff.
//! - `watchdog`: capture stall reporting.
//! - `telemetry`: tracing subscriber and metrics recorder.

pub use config::{ActuatorKind, ControllerCliArgs, ControllerConfig, SourceSpec};
pub use pipeline::run;
pub(crate) use telemetry::init_tracing;

mod annotation;
mod config;
mod engine;
mod pipeline;
mod server;
mod streaming;
mod telemetry;
mod watchdog;
