//! Property checks over the crossing evaluator and the arbiter.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use trigger_core::{
    ActuationArbiter, CooldownState, CrossingEvaluator, Detection, FireDecision, Polarity,
    TriggerLine,
};

fn detection() -> impl Strategy<Value = Detection> {
    (0i32..640, 0i32..480, 1u32..80, 1u32..80).prop_map(|(x, y, w, h)| Detection::new(x, y, w, h))
}

fn detections(max: usize) -> impl Strategy<Value = Vec<Detection>> {
    prop::collection::vec(detection(), 0..max)
}

/// A line position and a non-empty set whose centroids all sit right of it.
fn line_with_sets_right_of_it() -> impl Strategy<Value = (f32, Vec<Detection>, Vec<Detection>)> {
    (0i32..400).prop_flat_map(|line| {
        let right = (line + 1..640, 0i32..480, 1u32..80, 1u32..80)
            .prop_map(|(x, y, w, h)| Detection::new(x, y, w, h));
        (
            Just(line as f32),
            prop::collection::vec(right.clone(), 1..6),
            prop::collection::vec(right, 1..6),
        )
    })
}

proptest! {
    #[test]
    fn fires_are_separated_by_more_than_the_cooldown(
        cooldown_ms in 1u64..5_000,
        steps in prop::collection::vec((0u64..400, any::<bool>()), 1..200),
    ) {
        let cooldown = Duration::from_millis(cooldown_ms);
        let mut arbiter = ActuationArbiter::new(CooldownState::new(cooldown).unwrap());
        let t0 = Instant::now();
        let mut now = t0;
        let mut last_fire: Option<Instant> = None;
        for (advance_ms, crossing) in steps {
            now += Duration::from_millis(advance_ms);
            if arbiter.maybe_fire(crossing, now) == FireDecision::Fire {
                prop_assert!(crossing);
                if let Some(last) = last_fire {
                    prop_assert!(now.duration_since(last) > cooldown);
                }
                last_fire = Some(now);
            }
        }
    }

    #[test]
    fn empty_previous_never_crosses(current in detections(8), line_x in 0f32..640.0) {
        for polarity in [Polarity::LeftToRight, Polarity::RightToLeft] {
            let evaluator = CrossingEvaluator::new(polarity);
            prop_assert!(!evaluator.evaluate(&current, &[], TriggerLine::at(line_x)));
        }
    }

    #[test]
    fn evaluation_is_deterministic(
        current in detections(6),
        previous in detections(6),
        line_x in 0f32..640.0,
    ) {
        let evaluator = CrossingEvaluator::new(Polarity::LeftToRight);
        let line = TriggerLine::at(line_x);
        let first = evaluator.find_crossing(&current, &previous, line);
        let second = evaluator.find_crossing(&current, &previous, line);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn a_crossing_always_straddles_the_line(
        current in detections(6),
        previous in detections(6),
        line_x in 0f32..640.0,
    ) {
        let evaluator = CrossingEvaluator::new(Polarity::LeftToRight);
        if let Some(crossing) = evaluator.find_crossing(&current, &previous, TriggerLine::at(line_x)) {
            prop_assert!(crossing.from.x < line_x);
            prop_assert!(line_x <= crossing.to.x);
        }
    }

    #[test]
    fn stationary_targets_never_cross(set in detections(6), line_x in 0f32..640.0) {
        let evaluator = CrossingEvaluator::new(Polarity::LeftToRight);
        prop_assert!(!evaluator.evaluate(&set, &set, TriggerLine::at(line_x)));
    }

    #[test]
    fn targets_already_past_the_line_never_cross(
        (line_x, previous, current) in line_with_sets_right_of_it(),
    ) {
        let evaluator = CrossingEvaluator::new(Polarity::LeftToRight);
        prop_assert!(!evaluator.evaluate(&current, &previous, TriggerLine::at(line_x)));
    }

    #[test]
    fn single_target_moving_onto_or_past_the_line_crosses(
        line in 100i32..500,
        prev_x in 0i32..50,
        gap in 0i32..100,
        y in 0i32..400,
        w in 1u32..40,
        h in 1u32..40,
    ) {
        // previous centroid sits at most line - 30, the current one at least line
        let previous = [Detection::new(prev_x + line - 100, y, w, h)];
        let current = [Detection::new(line + gap, y, w, h)];
        prop_assert!(previous[0].centroid().x < line as f32);
        prop_assert!(current[0].centroid().x >= line as f32);
        let evaluator = CrossingEvaluator::new(Polarity::LeftToRight);
        prop_assert!(evaluator.evaluate(&current, &previous, TriggerLine::at(line as f32)));
    }
}
