//! Cooldown-gated fire arbitration.
//!
//! Two states: `Armed` and `Cooling`. A fire decision moves the arbiter into
//! `Cooling`; it drifts back to `Armed` purely as time passes. Crossings seen
//! while cooling are dropped, never queued.

use std::time::{Duration, Instant};

use crate::ConfigError;

#[derive(Clone, Copy, Debug)]
pub struct CooldownState {
    last_fire: Option<Instant>,
    cooldown: Duration,
}

impl CooldownState {
    pub fn new(cooldown: Duration) -> Result<Self, ConfigError> {
        if cooldown.is_zero() {
            return Err(ConfigError::Cooldown(0.0));
        }
        Ok(Self {
            last_fire: None,
            cooldown,
        })
    }

    pub fn from_secs_f64(secs: f64) -> Result<Self, ConfigError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::Cooldown(secs));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|_| ConfigError::Cooldown(secs))
            .and_then(Self::new)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_fire(&self) -> Option<Instant> {
        self.last_fire
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArbiterState {
    Armed,
    Cooling { remaining: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireDecision {
    Fire,
    Suppressed,
}

#[derive(Debug)]
pub struct ActuationArbiter {
    cooldown: CooldownState,
    fired: u64,
    suppressed: u64,
}

impl ActuationArbiter {
    pub fn new(cooldown: CooldownState) -> Self {
        Self {
            cooldown,
            fired: 0,
            suppressed: 0,
        }
    }

    /// Armed once strictly more than the cooldown has elapsed since the last
    /// fire. Timestamps earlier than the last fire count as zero elapsed.
    pub fn state(&self, now: Instant) -> ArbiterState {
        let Some(last) = self.cooldown.last_fire else {
            return ArbiterState::Armed;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed > self.cooldown.cooldown {
            ArbiterState::Armed
        } else {
            ArbiterState::Cooling {
                remaining: self.cooldown.cooldown - elapsed,
            }
        }
    }

    pub fn is_armed(&self, now: Instant) -> bool {
        matches!(self.state(now), ArbiterState::Armed)
    }

    /// Decide whether this tick fires. On `Fire` the fire timestamp is
    /// recorded before returning, so the caller drives the actuator already in
    /// the cooling window.
    pub fn maybe_fire(&mut self, crossing_detected: bool, now: Instant) -> FireDecision {
        if !crossing_detected {
            return FireDecision::Suppressed;
        }
        if self.is_armed(now) {
            self.cooldown.last_fire = Some(now);
            self.fired += 1;
            FireDecision::Fire
        } else {
            self.suppressed += 1;
            FireDecision::Suppressed
        }
    }

    pub fn cooldown(&self) -> &CooldownState {
        &self.cooldown
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Crossings dropped because the arbiter was cooling.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
