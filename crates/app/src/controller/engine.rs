//! Per-tick decision logic, free of sockets and cameras.

use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, info};
use trigger_core::{
    ActuationArbiter, Actuator, ActuatorError, ArbiterState, Crossing, CrossingEvaluator,
    DetectionSet, FireDecision, TargetDetector, TriggerLine,
};

use crate::controller::annotation::{self, HudState};

/// What one tick saw and did.
#[derive(Debug)]
pub(crate) struct TickReport {
    pub(crate) frame_number: u64,
    pub(crate) detections: DetectionSet,
    pub(crate) crossing: Option<Crossing>,
    pub(crate) decision: Option<FireDecision>,
    pub(crate) actuator_failed: bool,
    pub(crate) annotated: RgbImage,
}

impl TickReport {
    pub(crate) fn fired(&self) -> bool {
        self.decision == Some(FireDecision::Fire)
    }
}

/// Owns every piece of loop state: detector, crossing evaluator, arbiter,
/// actuator, the previous detection set, and the trigger line.
pub(crate) struct Controller {
    detector: Box<dyn TargetDetector>,
    evaluator: CrossingEvaluator,
    arbiter: ActuationArbiter,
    actuator: Box<dyn Actuator>,
    line: TriggerLine,
    previous: DetectionSet,
    frame_number: u64,
}

impl Controller {
    /// Parks the actuator before returning; a channel that cannot reach rest
    /// is a startup failure.
    pub(crate) fn new(
        detector: Box<dyn TargetDetector>,
        evaluator: CrossingEvaluator,
        arbiter: ActuationArbiter,
        mut actuator: Box<dyn Actuator>,
        line: TriggerLine,
    ) -> Result<Self, ActuatorError> {
        actuator.rest()?;
        Ok(Self {
            detector,
            evaluator,
            arbiter,
            actuator,
            line,
            previous: DetectionSet::new(),
            frame_number: 0,
        })
    }

    pub(crate) fn arbiter(&self) -> &ActuationArbiter {
        &self.arbiter
    }

    pub(crate) fn tick(&mut self, frame: &RgbImage, now: Instant) -> TickReport {
        self.frame_number += 1;
        let frame_number = self.frame_number;
        let _span = tracing::debug_span!("controller.tick", frame = frame_number).entered();

        let current = self.detector.detect(frame);

        // The arbiter gates on the same `now`, so a crossing seen while
        // cooling is counted and then dropped.
        let crossing = self
            .evaluator
            .find_crossing(&current, &self.previous, self.line);
        let decision = crossing.map(|crossing| {
            metrics::counter!("tripline_crossings_total").increment(1);
            let decision = self.arbiter.maybe_fire(true, now);
            match decision {
                FireDecision::Fire => {
                    metrics::counter!("tripline_fires_total").increment(1);
                    info!(
                        frame = frame_number,
                        from_x = crossing.from.x,
                        to_x = crossing.to.x,
                        line_x = self.line.x(),
                        "target crossed the line; firing"
                    );
                }
                FireDecision::Suppressed => {
                    metrics::counter!("tripline_fires_suppressed_total").increment(1);
                    debug!(frame = frame_number, "crossing ignored during cooldown");
                }
            }
            decision
        });

        let hud = if decision == Some(FireDecision::Fire) {
            HudState::Fired
        } else {
            match self.arbiter.state(now) {
                ArbiterState::Armed => HudState::Armed,
                ArbiterState::Cooling { remaining } => HudState::Cooling { remaining },
            }
        };
        let annotated = annotation::annotate(frame, &current, self.line, frame_number, hud);

        let mut actuator_failed = false;
        if decision == Some(FireDecision::Fire) {
            if let Err(err) = self.actuator.fire() {
                actuator_failed = true;
                metrics::counter!("tripline_actuator_errors_total").increment(1);
                error!(frame = frame_number, error = %err, "actuator fire failed");
            }
        }

        self.previous = current.clone();

        TickReport {
            frame_number,
            detections: current,
            crossing,
            decision,
            actuator_failed,
            annotated,
        }
    }

    /// Return the actuator to rest for shutdown.
    pub(crate) fn shutdown(&mut self) -> Result<(), ActuatorError> {
        self.actuator.rest()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use image::Rgb;
    use trigger_core::{
        CooldownState, Detection, Polarity, ServoActuator, ServoPosition, SimulatedPin,
    };

    use super::*;

    /// Hands out a scripted detection set per tick.
    struct Scripted(Mutex<VecDeque<DetectionSet>>);

    impl TargetDetector for Scripted {
        fn detect(&self, _image: &RgbImage) -> DetectionSet {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()
        }
    }

    fn at(x: i32) -> DetectionSet {
        vec![Detection::new(x, 50, 20, 20)]
    }

    fn controller(
        script: Vec<DetectionSet>,
        cooldown: Duration,
    ) -> (Controller, Arc<Mutex<Vec<ServoPosition>>>) {
        let pin = SimulatedPin::new("test");
        let history = pin.history();
        let controller = Controller::new(
            Box::new(Scripted(Mutex::new(script.into()))),
            CrossingEvaluator::new(Polarity::LeftToRight),
            ActuationArbiter::new(CooldownState::new(cooldown).unwrap()),
            Box::new(ServoActuator::new(pin, Duration::from_millis(1))),
            TriggerLine::at(150.0),
        )
        .unwrap();
        (controller, history)
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(320, 200, Rgb([40, 40, 40]))
    }

    #[test]
    fn new_parks_the_actuator() {
        let (_controller, history) = controller(vec![], Duration::from_secs(1));
        assert_eq!(*history.lock().unwrap(), vec![ServoPosition::Rest]);
    }

    #[test]
    fn crossing_fires_once_and_returns_to_rest() {
        let (mut controller, history) = controller(vec![at(90), at(190)], Duration::from_secs(3));
        let t0 = Instant::now();
        let first = controller.tick(&frame(), t0);
        assert!(first.crossing.is_none());
        assert!(first.decision.is_none());

        let second = controller.tick(&frame(), t0 + Duration::from_millis(33));
        assert!(second.fired());
        assert!(!second.actuator_failed);
        assert_eq!(second.frame_number, 2);
        assert_eq!(
            *history.lock().unwrap(),
            vec![
                ServoPosition::Rest,
                ServoPosition::Extended,
                ServoPosition::Rest
            ]
        );
        assert_eq!(second.detections, at(190));
    }

    #[test]
    fn crossings_during_cooldown_are_suppressed() {
        let script = vec![at(90), at(190), at(90), at(190), at(90), at(190)];
        let (mut controller, _history) = controller(script, Duration::from_secs(3));
        let t0 = Instant::now();
        let mut fires = 0;
        for i in 0..6u64 {
            let report = controller.tick(&frame(), t0 + Duration::from_millis(100 * i));
            fires += report.fired() as u32;
        }
        assert_eq!(fires, 1);
        assert_eq!(controller.arbiter().suppressed(), 2);
    }

    #[test]
    fn fires_again_once_the_cooldown_has_passed() {
        let script = vec![at(90), at(190), at(90), at(190)];
        let (mut controller, _history) = controller(script, Duration::from_secs(1));
        let t0 = Instant::now();
        controller.tick(&frame(), t0);
        assert!(controller.tick(&frame(), t0 + Duration::from_millis(30)).fired());
        controller.tick(&frame(), t0 + Duration::from_millis(900));
        assert!(controller
            .tick(&frame(), t0 + Duration::from_millis(1100))
            .fired());
    }

    #[test]
    fn annotated_frame_is_a_copy() {
        let (mut controller, _history) = controller(vec![at(90)], Duration::from_secs(1));
        let input = frame();
        let report = controller.tick(&input, Instant::now());
        assert!(input.pixels().all(|p| *p == Rgb([40, 40, 40])));
        assert_eq!(report.annotated.dimensions(), input.dimensions());
        assert_eq!(*report.annotated.get_pixel(150, 10), Rgb([255, 0, 0]));
    }

    #[test]
    fn actuator_failures_are_reported_and_the_loop_continues() {
        let pin = SimulatedPin::new("broken").failing_on(ServoPosition::Extended);
        let mut controller = Controller::new(
            Box::new(Scripted(Mutex::new(vec![at(90), at(190), at(200)].into()))),
            CrossingEvaluator::new(Polarity::LeftToRight),
            ActuationArbiter::new(CooldownState::new(Duration::from_secs(1)).unwrap()),
            Box::new(ServoActuator::new(pin, Duration::ZERO)),
            TriggerLine::at(150.0),
        )
        .unwrap();
        let t0 = Instant::now();
        controller.tick(&frame(), t0);
        let report = controller.tick(&frame(), t0 + Duration::from_millis(30));
        assert!(report.fired());
        assert!(report.actuator_failed);
        let report = controller.tick(&frame(), t0 + Duration::from_millis(60));
        assert_eq!(report.frame_number, 3);
    }
}
