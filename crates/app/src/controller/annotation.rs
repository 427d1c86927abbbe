//! Overlay drawing for the preview stream and JPEG encoding.
//!
//! Detections get green boxes, the trigger line is red, and a small HUD in the
//! bottom-left corner shows the arbiter state and the frame counter. Text uses
//! a built-in 5x7 bitmap font so no font files are needed.

use std::time::Duration;

use image::{ImageResult, Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use trigger_core::{Detection, TriggerLine};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const HUD_BG: Rgb<u8> = Rgb([0, 0, 0]);
const GLYPH_ADVANCE: i32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HudState {
    Armed,
    Cooling { remaining: Duration },
    Fired,
}

impl HudState {
    fn text(self) -> (String, Rgb<u8>) {
        match self {
            HudState::Armed => ("ARMED".to_string(), Rgb([0, 255, 0])),
            HudState::Cooling { remaining } => (
                format!("COOLING {:.1}", remaining.as_secs_f32()),
                Rgb([255, 200, 0]),
            ),
            HudState::Fired => ("FIRE".to_string(), Rgb([255, 0, 0])),
        }
    }
}

/// Draw overlays onto a copy of `frame`; the input is left untouched.
pub(crate) fn annotate(
    frame: &RgbImage,
    detections: &[Detection],
    line: TriggerLine,
    frame_number: u64,
    state: HudState,
) -> RgbImage {
    let mut image = frame.clone();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image;
    }

    for det in detections {
        draw_rectangle(&mut image, det.x, det.y, det.right(), det.bottom(), BOX_COLOR);
    }

    let line_x = line.x() as i32;
    fill_rect(
        &mut image,
        line_x,
        0,
        line_x + 1,
        height as i32 - 1,
        LINE_COLOR,
    );

    let (state_text, state_color) = state.text();
    let info = format!("FRAME {frame_number:06}");
    let hud_y = (height as i32 - 22).max(0);
    let hud_width = text_width(&state_text).max(text_width(&info));
    fill_rect(&mut image, 0, hud_y, hud_width + 4, hud_y + 20, HUD_BG);
    draw_label(&mut image, 2, hud_y + 2, &state_text, state_color);
    draw_label(&mut image, 2, hud_y + 12, &info, Rgb([255, 255, 255]));

    image
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let l = left.clamp(0, width - 1);
    let r = right.clamp(0, width - 1);
    let t = top.clamp(0, height - 1);
    let b = bottom.clamp(0, height - 1);

    for x in l..=r {
        if top >= 0 {
            image.put_pixel(x as u32, t as u32, color);
        }
        if bottom < height {
            image.put_pixel(x as u32, b as u32, color);
        }
    }
    for y in t..=b {
        if left >= 0 {
            image.put_pixel(l as u32, y as u32, color);
        }
        if right < width {
            image.put_pixel(r as u32, y as u32, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    let px = x + col;
                    if (pattern >> (4 - col)) & 1 == 1 && px >= 0 && px < width {
                        image.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> RgbImage {
        RgbImage::from_pixel(120, 80, Rgb([40, 40, 40]))
    }

    #[test]
    fn annotation_leaves_the_source_frame_untouched() {
        let frame = blank();
        let out = annotate(
            &frame,
            &[Detection::new(10, 10, 20, 20)],
            TriggerLine::at(90.0),
            7,
            HudState::Armed,
        );
        assert!(frame.pixels().all(|p| *p == Rgb([40, 40, 40])));
        assert_ne!(out, frame);
    }

    #[test]
    fn boxes_and_line_are_drawn_in_their_colours() {
        let out = annotate(
            &blank(),
            &[Detection::new(10, 10, 20, 20)],
            TriggerLine::at(90.0),
            0,
            HudState::Fired,
        );
        assert_eq!(*out.get_pixel(10, 10), BOX_COLOR);
        assert_eq!(*out.get_pixel(29, 29), BOX_COLOR);
        assert_eq!(*out.get_pixel(20, 20), Rgb([40, 40, 40]));
        assert_eq!(*out.get_pixel(90, 5), LINE_COLOR);
    }

    #[test]
    fn boxes_partly_off_frame_are_clipped() {
        let out = annotate(
            &blank(),
            &[Detection::new(-5, -5, 20, 20), Detection::new(110, 70, 30, 30)],
            TriggerLine::at(60.0),
            0,
            HudState::Cooling {
                remaining: Duration::from_millis(1200),
            },
        );
        assert_eq!(*out.get_pixel(14, 5), BOX_COLOR);
        assert_eq!(*out.get_pixel(110, 75), BOX_COLOR);
    }

    #[test]
    fn encoded_frames_are_jpeg() {
        let jpeg = encode_jpeg(&blank(), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 80));
    }
}
