use std::sync::{Arc, Mutex};

use tracing::info;

use super::{ActuatorError, ServoPin, ServoPosition};

/// Servo stand-in for bench runs: logs and records every commanded position.
#[derive(Clone, Debug)]
pub struct SimulatedPin {
    name: String,
    history: Arc<Mutex<Vec<ServoPosition>>>,
    fail_on: Option<ServoPosition>,
}

impl SimulatedPin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            history: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
        }
    }

    /// Reject every request for `position` with `ActuatorError::Unavailable`.
    pub fn failing_on(mut self, position: ServoPosition) -> Self {
        self.fail_on = Some(position);
        self
    }

    /// Shared handle on the positions successfully applied so far.
    pub fn history(&self) -> Arc<Mutex<Vec<ServoPosition>>> {
        Arc::clone(&self.history)
    }
}

impl ServoPin for SimulatedPin {
    fn set_position(&mut self, position: ServoPosition) -> Result<(), ActuatorError> {
        if self.fail_on == Some(position) {
            return Err(ActuatorError::Unavailable(self.name.clone()));
        }
        info!(pin = %self.name, ?position, "simulated servo moved");
        if let Ok(mut history) = self.history.lock() {
            history.push(position);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("simulated:{}", self.name)
    }
}
