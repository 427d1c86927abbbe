//! Per-frame decision core for the tripline controller.
//!
//! - `detection`: boxes, centroids, and the trigger line.
//! - `detector`: HSV colour-blob detector turning a frame into boxes.
//! - `crossing`: nearest-neighbour association and directional crossing test.
//! - `arbiter`: cooldown-gated single-fire state machine.
//! - `actuator`: scoped servo stroke and its pin backends.

pub mod actuator;
pub mod arbiter;
pub mod crossing;
pub mod detection;
pub mod detector;
mod error;

pub use actuator::{
    Actuator, ActuatorError, ServoActuator, ServoPin, ServoPosition, SimulatedPin, SysfsPwmPin,
};
pub use arbiter::{ActuationArbiter, ArbiterState, CooldownState, FireDecision};
pub use crossing::{Associator, Crossing, CrossingEvaluator, NearestNeighbour, Polarity};
pub use detection::{Centroid, Detection, DetectionSet, TriggerLine};
pub use detector::{ColorBlobDetector, HsvRange, TargetDetector};
pub use error::ConfigError;
