//! Directional line-crossing inference over consecutive detection sets.
//!
//! Each current box is paired with the nearest previous centroid. Under
//! several simultaneous targets this can mis-associate; the [`Associator`]
//! seam lets a real tracker replace it without touching the crossing test.

use std::{fmt, str::FromStr};

use serde::Deserialize;

use crate::{Centroid, ConfigError, Detection, TriggerLine};

/// Direction a target must travel for its crossing to count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Polarity {
    /// `prev_x < line_x <= curr_x`
    #[default]
    LeftToRight,
    /// `prev_x > line_x >= curr_x`
    RightToLeft,
}

impl Polarity {
    pub fn crosses(self, prev_x: f32, line_x: f32, curr_x: f32) -> bool {
        match self {
            Polarity::LeftToRight => prev_x < line_x && line_x <= curr_x,
            Polarity::RightToLeft => prev_x > line_x && line_x >= curr_x,
        }
    }
}

impl FromStr for Polarity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left-to-right" | "ltr" => Ok(Polarity::LeftToRight),
            "right-to-left" | "rtl" => Ok(Polarity::RightToLeft),
            other => Err(ConfigError::Polarity(other.to_string())),
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Polarity::LeftToRight => "left-to-right",
            Polarity::RightToLeft => "right-to-left",
        })
    }
}

/// Pairs a current-frame position with a previous-frame position.
pub trait Associator: Send {
    /// Return the previous centroid `target` is believed to have come from,
    /// or `None` when `previous` offers no candidate.
    fn associate(&self, target: Centroid, previous: &[Detection]) -> Option<Centroid>;
}

/// Nearest previous centroid by Euclidean distance; ties keep the first seen.
#[derive(Clone, Copy, Debug, Default)]
pub struct NearestNeighbour;

impl Associator for NearestNeighbour {
    fn associate(&self, target: Centroid, previous: &[Detection]) -> Option<Centroid> {
        let mut best: Option<(f32, Centroid)> = None;
        for candidate in previous.iter().map(Detection::centroid) {
            let dist = target.distance(&candidate);
            match best {
                Some((best_dist, _)) if dist >= best_dist => {}
                _ => best = Some((dist, candidate)),
            }
        }
        best.map(|(_, centroid)| centroid)
    }
}

/// One associated pair that satisfied the crossing test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crossing {
    pub detection: Detection,
    pub from: Centroid,
    pub to: Centroid,
}

#[derive(Clone, Debug, Default)]
pub struct CrossingEvaluator<A = NearestNeighbour> {
    associator: A,
    polarity: Polarity,
}

impl CrossingEvaluator<NearestNeighbour> {
    pub fn new(polarity: Polarity) -> Self {
        Self {
            associator: NearestNeighbour,
            polarity,
        }
    }
}

impl<A: Associator> CrossingEvaluator<A> {
    pub fn with_associator(associator: A, polarity: Polarity) -> Self {
        Self {
            associator,
            polarity,
        }
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// True when any current detection crossed `line` since `previous`.
    pub fn evaluate(&self, current: &[Detection], previous: &[Detection], line: TriggerLine) -> bool {
        self.find_crossing(current, previous, line).is_some()
    }

    /// First current detection (in order) whose associated previous position
    /// lies on the far side of `line`.
    pub fn find_crossing(
        &self,
        current: &[Detection],
        previous: &[Detection],
        line: TriggerLine,
    ) -> Option<Crossing> {
        if previous.is_empty() {
            return None;
        }
        let line_x = line.x();
        current.iter().find_map(|detection| {
            let to = detection.centroid();
            let from = self.associator.associate(to, previous)?;
            self.polarity
                .crosses(from.x, line_x, to.x)
                .then_some(Crossing {
                    detection: *detection,
                    from,
                    to,
                })
        })
    }
}
