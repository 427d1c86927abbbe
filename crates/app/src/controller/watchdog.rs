//! Capture stall detection.
//!
//! The control loop beats on every acquired frame; a polling thread warns once
//! when the beats stop and logs again when they resume. Nothing is restarted:
//! a stalled camera stalls detection but the process stays up.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::controller::telemetry;

pub(crate) const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub(crate) const WATCHDOG_STALL_THRESHOLD: Duration = Duration::from_millis(1_500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    Healthy,
    Stalled { silent_for: Duration },
    Recovered,
}

pub(crate) struct CaptureHealth {
    epoch: Instant,
    last_beat_ms: AtomicU64,
    stalled: AtomicBool,
    threshold: Duration,
}

impl CaptureHealth {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_beat_ms: AtomicU64::new(0),
            stalled: AtomicBool::new(false),
            threshold,
        }
    }

    fn millis(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }

    pub(crate) fn beat(&self, now: Instant) {
        self.last_beat_ms.store(self.millis(now), Ordering::Relaxed);
    }

    /// Compare the last beat against `now`; reports each stall and each
    /// recovery exactly once.
    pub(crate) fn poll(&self, now: Instant) -> HealthEvent {
        let silent_for = Duration::from_millis(
            self.millis(now)
                .saturating_sub(self.last_beat_ms.load(Ordering::Relaxed)),
        );
        let stalled = silent_for > self.threshold;
        let was_stalled = self.stalled.swap(stalled, Ordering::SeqCst);
        match (was_stalled, stalled) {
            (false, true) => HealthEvent::Stalled { silent_for },
            (true, false) => HealthEvent::Recovered,
            _ => HealthEvent::Healthy,
        }
    }
}

pub(crate) fn spawn_watchdog(
    health: Arc<CaptureHealth>,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("tripline-watchdog", move || {
        while running.load(Ordering::Relaxed) {
            thread::sleep(WATCHDOG_POLL_INTERVAL);
            match health.poll(Instant::now()) {
                HealthEvent::Stalled { silent_for } => {
                    metrics::counter!("tripline_capture_stalls_total").increment(1);
                    warn!(
                        silent_ms = silent_for.as_millis() as u64,
                        "capture stalled; detection and actuation are paused"
                    );
                }
                HealthEvent::Recovered => info!("capture recovered"),
                HealthEvent::Healthy => {}
            }
        }
    })
    .context("failed to spawn watchdog thread")
}
