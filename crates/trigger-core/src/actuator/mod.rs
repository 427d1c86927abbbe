//! Servo actuator driver.
//!
//! A fire is a scoped stroke: extend, hold, return to rest. The return to rest
//! happens in a drop guard so a panicking or failing hold still leaves the arm
//! parked.

mod simulated;
mod sysfs;

use std::{path::PathBuf, thread, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

pub use simulated::SimulatedPin;
pub use sysfs::SysfsPwmPin;

/// PWM period shared by every hobby servo position.
pub const SERVO_PERIOD: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("pwm sysfs write to {path} failed")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("actuator channel {0} is unavailable")]
    Unavailable(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServoPosition {
    Rest,
    Extended,
}

impl ServoPosition {
    /// High time of the PWM pulse for this position.
    pub fn pulse(self) -> Duration {
        match self {
            ServoPosition::Rest => Duration::from_micros(1500),
            ServoPosition::Extended => Duration::from_micros(2000),
        }
    }
}

/// One physical (or simulated) servo output.
pub trait ServoPin: Send {
    fn set_position(&mut self, position: ServoPosition) -> Result<(), ActuatorError>;
    fn describe(&self) -> String;
}

impl<P: ServoPin + ?Sized> ServoPin for Box<P> {
    fn set_position(&mut self, position: ServoPosition) -> Result<(), ActuatorError> {
        (**self).set_position(position)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

pub trait Actuator: Send {
    /// Park the actuator. Idempotent.
    fn rest(&mut self) -> Result<(), ActuatorError>;
    /// Run one full stroke. Blocks for the hold time and returns with the
    /// actuator back at rest.
    fn fire(&mut self) -> Result<(), ActuatorError>;
}

pub struct ServoActuator<P: ServoPin> {
    pin: P,
    hold: Duration,
    position: Option<ServoPosition>,
}

impl<P: ServoPin> ServoActuator<P> {
    pub fn new(pin: P, hold: Duration) -> Self {
        Self {
            pin,
            hold,
            position: None,
        }
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Last position successfully commanded, if any.
    pub fn position(&self) -> Option<ServoPosition> {
        self.position
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }

    fn set(&mut self, position: ServoPosition) -> Result<(), ActuatorError> {
        self.pin.set_position(position)?;
        self.position = Some(position);
        Ok(())
    }
}

impl<P: ServoPin> Actuator for ServoActuator<P> {
    fn rest(&mut self) -> Result<(), ActuatorError> {
        self.set(ServoPosition::Rest)
    }

    fn fire(&mut self) -> Result<(), ActuatorError> {
        let stroke = Stroke::begin(self)?;
        thread::sleep(stroke.actuator.hold);
        stroke.finish()
    }
}

/// Extended servo that returns to rest when dropped.
struct Stroke<'a, P: ServoPin> {
    actuator: &'a mut ServoActuator<P>,
    finished: bool,
}

impl<'a, P: ServoPin> Stroke<'a, P> {
    fn begin(actuator: &'a mut ServoActuator<P>) -> Result<Self, ActuatorError> {
        if let Err(err) = actuator.set(ServoPosition::Extended) {
            if let Err(rest_err) = actuator.set(ServoPosition::Rest) {
                warn!(error = %rest_err, "failed to park servo after aborted stroke");
            }
            return Err(err);
        }
        debug!(pin = %actuator.pin.describe(), "servo extended");
        Ok(Self {
            actuator,
            finished: false,
        })
    }

    fn finish(mut self) -> Result<(), ActuatorError> {
        self.finished = true;
        self.actuator.set(ServoPosition::Rest)
    }
}

impl<P: ServoPin> Drop for Stroke<'_, P> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.actuator.set(ServoPosition::Rest) {
            warn!(error = %err, "failed to park servo after interrupted stroke");
        }
    }
}
