//! Colour-blob target detector.
//!
//! Thresholds the frame in HSV (OpenCV 8-bit scale: H in 0..=180, S and V in
//! 0..=255), median-filters the mask, traces outer contours, and keeps blobs
//! that are large and round enough.

use std::f64::consts::PI;

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
    contours::{BorderType, find_contours},
    filter::median_filter,
    geometry::arc_length,
    point::Point,
};

use crate::{ConfigError, Detection, DetectionSet};

/// Anything that turns a frame into candidate target boxes.
pub trait TargetDetector: Send {
    fn detect(&self, image: &RgbImage) -> DetectionSet;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Result<Self, ConfigError> {
        if lower.iter().zip(upper.iter()).any(|(lo, hi)| lo > hi) {
            return Err(ConfigError::HsvRange { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    /// Green targets.
    pub fn green() -> Self {
        Self {
            lower: [40, 50, 50],
            upper: [80, 255, 255],
        }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}

#[derive(Clone, Debug)]
pub struct ColorBlobDetector {
    range: HsvRange,
    median_radius: u32,
    min_area: f64,
    min_circularity: f64,
}

impl Default for ColorBlobDetector {
    fn default() -> Self {
        Self {
            range: HsvRange::green(),
            median_radius: 2,
            min_area: 100.0,
            min_circularity: 0.7,
        }
    }
}

impl ColorBlobDetector {
    pub fn new(range: HsvRange) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    pub fn with_min_area(mut self, min_area: f64) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn with_min_circularity(mut self, min_circularity: f64) -> Self {
        self.min_circularity = min_circularity;
        self
    }

    pub fn mask(&self, image: &RgbImage) -> GrayImage {
        let (width, height) = image.dimensions();
        let mut mask = GrayImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels() {
            if self.range.contains(rgb_to_hsv(*pixel)) {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        if self.median_radius > 0 {
            median_filter(&mask, self.median_radius, self.median_radius)
        } else {
            mask
        }
    }
}

impl TargetDetector for ColorBlobDetector {
    fn detect(&self, image: &RgbImage) -> DetectionSet {
        let mask = self.mask(image);
        find_contours::<i32>(&mask)
            .into_iter()
            .filter(|contour| {
                matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none()
            })
            .filter_map(|contour| {
                let points = &contour.points;
                let area = polygon_area(points);
                if area < self.min_area {
                    return None;
                }
                let perimeter = arc_length(points, true);
                if perimeter <= 0.0 {
                    return None;
                }
                let circularity = 4.0 * PI * area / (perimeter * perimeter);
                if circularity <= self.min_circularity {
                    return None;
                }
                bounding_box(points)
            })
            .collect()
    }
}

/// Shoelace area of the closed polygon through the contour pixels.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: i64 = (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum();
    twice.abs() as f64 / 2.0
}

fn bounding_box(points: &[Point<i32>]) -> Option<Detection> {
    let first = points.first()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    Detection::try_new(
        min_x,
        min_y,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}

/// RGB to HSV on the OpenCV 8-bit scale.
pub fn rgb_to_hsv(pixel: Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(f32::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;
    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }
    [
        (h / 2.0).round().min(180.0) as u8,
        s.round() as u8,
        v.round() as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const BG: Rgb<u8> = Rgb([40, 40, 40]);
    const GREEN: Rgb<u8> = Rgb([0, 200, 0]);

    fn disc(img: &mut RgbImage, cx: f32, cy: f32, r: f32, color: Rgb<u8>) {
        let (w, h) = img.dimensions();
        for y in 0..h {
            for x in 0..w {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                if dx * dx + dy * dy <= r * r {
                    img.put_pixel(x, y, color);
                }
            }
        }
    }

    fn rect(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, color);
            }
        }
    }

    #[test]
    fn hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 0])), [0, 0, 0]);
        assert_eq!(rgb_to_hsv(Rgb([128, 128, 128])), [0, 0, 128]);
    }

    #[test]
    fn finds_a_green_disc() {
        let mut img = RgbImage::from_pixel(200, 120, BG);
        disc(&mut img, 60.0, 50.0, 15.0, GREEN);
        let found = ColorBlobDetector::default().detect(&img);
        assert_eq!(found.len(), 1);
        let c = found[0].centroid();
        assert!((c.x - 60.5).abs() <= 1.5, "centroid x {}", c.x);
        assert!((c.y - 50.5).abs() <= 1.5, "centroid y {}", c.y);
        assert!((29..=32).contains(&found[0].width));
    }

    #[test]
    fn ignores_other_colours_small_specks_and_thin_bars() {
        let mut img = RgbImage::from_pixel(240, 160, BG);
        disc(&mut img, 40.0, 40.0, 15.0, Rgb([200, 0, 0]));
        disc(&mut img, 120.0, 40.0, 4.0, GREEN);
        rect(&mut img, 20, 120, 180, 8, GREEN);
        assert!(ColorBlobDetector::default().detect(&img).is_empty());
    }

    #[test]
    fn separate_discs_yield_separate_boxes() {
        let mut img = RgbImage::from_pixel(300, 120, BG);
        disc(&mut img, 50.0, 60.0, 14.0, GREEN);
        disc(&mut img, 220.0, 60.0, 18.0, GREEN);
        let mut found = ColorBlobDetector::default().detect(&img);
        found.sort_by_key(|d| d.x);
        assert_eq!(found.len(), 2);
        assert!(found[0].right() < 100);
        assert!(found[1].x > 150);
    }

    #[test]
    fn hsv_range_rejects_inverted_bounds() {
        assert!(HsvRange::new([80, 0, 0], [40, 255, 255]).is_err());
        assert!(HsvRange::new([40, 50, 50], [80, 255, 255]).is_ok());
    }
}
