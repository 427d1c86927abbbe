use crate::ConfigError;

/// Axis-aligned bounding box of one candidate target in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Detections for one frame, in detector order.
pub type DetectionSet = Vec<Detection>;

impl Detection {
    /// Build a box. Zero-sized boxes are a detector defect.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        debug_assert!(
            width > 0 && height > 0,
            "degenerate detection {width}x{height} at ({x}, {y})"
        );
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn try_new(x: i32, y: i32, width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self {
            x,
            y,
            width,
            height,
        })
    }

    pub fn centroid(&self) -> Centroid {
        Centroid {
            x: self.x as f32 + self.width as f32 / 2.0,
            y: self.y as f32 + self.height as f32 / 2.0,
        }
    }

    /// Inclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width as i32 - 1
    }

    /// Inclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32 - 1
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
}

impl Centroid {
    pub fn distance(&self, other: &Centroid) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Vertical line in frame pixels. Fixed once from the first frame's width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerLine {
    x: f32,
}

impl TriggerLine {
    /// Place the line at `floor(fraction * width)`.
    pub fn from_frame_width(width: u32, fraction: f32) -> Result<Self, ConfigError> {
        if width == 0 {
            return Err(ConfigError::FrameWidth);
        }
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::LineFraction(fraction));
        }
        Ok(Self {
            x: (width as f32 * fraction).floor(),
        })
    }

    pub fn at(x: f32) -> Self {
        Self { x }
    }

    pub fn x(&self) -> f32 {
        self.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_is_box_centre() {
        let det = Detection::new(200, 52, 22, 18);
        assert_eq!(det.centroid(), Centroid { x: 211.0, y: 61.0 });
        assert_eq!(det.right(), 221);
        assert_eq!(det.bottom(), 69);
    }

    #[test]
    fn zero_sized_boxes_are_refused_by_checked_constructor() {
        assert!(Detection::try_new(0, 0, 0, 4).is_none());
        assert!(Detection::try_new(0, 0, 4, 0).is_none());
        assert!(Detection::try_new(0, 0, 1, 1).is_some());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "degenerate detection")]
    fn zero_sized_boxes_trip_the_debug_assertion() {
        let _ = Detection::new(3, 3, 0, 5);
    }

    #[test]
    fn trigger_line_truncates_like_integer_pixels() {
        assert_eq!(TriggerLine::from_frame_width(640, 0.75).unwrap().x(), 480.0);
        assert_eq!(TriggerLine::from_frame_width(641, 0.75).unwrap().x(), 480.0);
        assert_eq!(TriggerLine::from_frame_width(100, 0.0).unwrap().x(), 0.0);
    }

    #[test]
    fn trigger_line_rejects_out_of_range_fractions() {
        assert_eq!(
            TriggerLine::from_frame_width(640, 1.5),
            Err(ConfigError::LineFraction(1.5))
        );
        assert!(TriggerLine::from_frame_width(640, f32::NAN).is_err());
        assert_eq!(
            TriggerLine::from_frame_width(0, 0.5),
            Err(ConfigError::FrameWidth)
        );
    }
}
