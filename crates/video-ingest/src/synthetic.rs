//! Built-in scene generator used for bench runs without a camera attached.
//!
//! Renders a green disc sweeping horizontally across a dark background.

use std::{
    thread,
    time::{Duration, Instant},
};

use image::{Rgb, RgbImage};

use crate::{CaptureError, Frame, FrameSource};

#[derive(Clone, Debug)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    pub radius: u32,
    /// Horizontal travel per frame in pixels.
    pub speed_px: u32,
    /// Vertical position of the disc centre as a fraction of the height.
    pub y_fraction: f32,
    pub fps: f64,
    /// Report a transient miss every N frames.
    pub dropout_every: Option<u64>,
}

impl SyntheticScene {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            radius: (height / 16).max(6),
            speed_px: (width / 60).max(2),
            y_fraction: 0.5,
            fps,
            dropout_every: None,
        }
    }
}

const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);
const TARGET: Rgb<u8> = Rgb([0, 200, 0]);

pub struct SyntheticSource {
    scene: SyntheticScene,
    tick: u64,
    last_emit: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            scene,
            tick: 0,
            last_emit: None,
        }
    }

    /// Disc centre x for a given frame index. Wraps once the disc has fully
    /// left the right edge.
    pub fn centre_x(&self, tick: u64) -> i64 {
        let r = self.scene.radius as i64;
        let span = self.scene.width as i64 + 2 * r;
        let travelled = (tick as i64).saturating_mul(self.scene.speed_px as i64);
        travelled.rem_euclid(span) - r
    }

    pub fn render(&self, tick: u64) -> RgbImage {
        let SyntheticScene {
            width,
            height,
            radius,
            y_fraction,
            ..
        } = self.scene;
        let cx = self.centre_x(tick) as f32;
        let cy = height as f32 * y_fraction;
        let r = radius as f32;
        let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
        let min_x = (cx - r).floor().max(0.0) as u32;
        let max_x = ((cx + r).ceil().max(0.0) as u32).min(width.saturating_sub(1));
        let min_y = (cy - r).floor().max(0.0) as u32;
        let max_y = ((cy + r).ceil().max(0.0) as u32).min(height.saturating_sub(1));
        if cx + r < 0.0 || min_x > max_x {
            return img;
        }
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                if dx * dx + dy * dy <= r * r {
                    img.put_pixel(x, y, TARGET);
                }
            }
        }
        img
    }

    fn pace(&mut self) {
        if self.scene.fps <= 0.0 {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.scene.fps);
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < period {
                thread::sleep(period - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.scene.width, self.scene.height)
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.pace();
        let tick = self.tick;
        self.tick = self.tick.wrapping_add(1);
        if let Some(every) = self.scene.dropout_every {
            if every > 0 && tick > 0 && tick % every == 0 {
                return Ok(None);
            }
        }
        Ok(Some(Frame::from_rgb_image(self.render(tick))))
    }
}
