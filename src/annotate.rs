//! Frame annotation: person boxes plus a metrics panel.
//!
//! Text uses a built-in 5x7 bitmap font so annotation has no font files or
//! system dependencies. Glyph rows are 5-bit patterns, MSB on the left.

use image::{Rgb, RgbImage};

use crate::density::{check_threshold, DensityEstimate};
use crate::detect::Detection;
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 100, 255]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

/// Panel rectangle, inclusive corners.
const PANEL: (i32, i32, i32, i32) = (10, 10, 350, 120);
/// Panel background keeps this share of the underlying pixel.
const PANEL_KEEP: f32 = 0.3;
const PANEL_TEXT_X: i32 = 20;
const PANEL_TEXT_SCALE: i32 = 2;

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameAnnotator;

impl FrameAnnotator {
    pub fn new() -> Self {
        Self
    }

    /// Returns an annotated copy; `frame` is left untouched.
    pub fn annotate(
        &self,
        frame: &Frame,
        detections: &[Detection],
        estimate: &DensityEstimate,
        threshold: f64,
    ) -> RgbImage {
        let mut image = frame.image().clone();
        for detection in detections {
            draw_detection(&mut image, detection);
        }
        draw_panel(&mut image, estimate, check_threshold(estimate.density_value, threshold));
        image
    }
}

fn draw_detection(image: &mut RgbImage, detection: &Detection) {
    let b = detection.bbox;
    draw_rectangle(image, b.x1, b.y1, b.x2, b.y2, BOX_COLOR);
    draw_rectangle(
        image,
        b.x1.saturating_add(1),
        b.y1.saturating_add(1),
        b.x2.saturating_sub(1),
        b.y2.saturating_sub(1),
        BOX_COLOR,
    );

    let label = format!("Person {:.2}", detection.confidence);
    let label_w = text_width(&label, 1);
    fill_rect(
        image,
        b.x1,
        b.y1.saturating_sub(GLYPH_H + 10),
        b.x1.saturating_add(label_w),
        b.y1,
        BOX_COLOR,
    );
    draw_text(image, b.x1, b.y1.saturating_sub(5 + GLYPH_H), &label, WHITE, 1);
}

fn draw_panel(image: &mut RgbImage, estimate: &DensityEstimate, alert: bool) {
    let (left, top, right, bottom) = PANEL;
    darken_rect(image, left, top, right, bottom, PANEL_KEEP);

    let density_color = if alert { RED } else { GREEN };
    let lines = [
        (35, format!("People: {}", estimate.person_count), WHITE),
        (60, format!("Density: {:.2}", estimate.density_value), density_color),
        (85, format!("Per sqm: {:.2}", estimate.density_per_sqm), WHITE),
    ];
    for (baseline, text, color) in lines.iter() {
        draw_text(
            image,
            PANEL_TEXT_X,
            baseline - GLYPH_H * PANEL_TEXT_SCALE,
            text,
            *color,
            PANEL_TEXT_SCALE,
        );
    }
    if alert {
        draw_text(
            image,
            PANEL_TEXT_X,
            110 - GLYPH_H * PANEL_TEXT_SCALE,
            "ALERT: OVERCROWDING!",
            RED,
            PANEL_TEXT_SCALE,
        );
    }
}

fn text_width(text: &str, scale: i32) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * scale
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    if right < left || bottom < top {
        return;
    }
    // Only the visible span of each edge is walked.
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    for x in left.max(0)..=right.min(max_x) {
        put(image, x, top, color);
        put(image, x, bottom, color);
    }
    for y in top.max(0)..=bottom.min(max_y) {
        put(image, left, y, color);
        put(image, right, y, color);
    }
}

fn clamp_rect(image: &RgbImage, left: i32, top: i32, right: i32, bottom: i32) -> Option<(u32, u32, u32, u32)> {
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    let (l, r) = (left.max(0), right.min(max_x));
    let (t, b) = (top.max(0), bottom.min(max_y));
    if l > r || t > b {
        return None;
    }
    Some((l as u32, t as u32, r as u32, b as u32))
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let Some((l, t, r, b)) = clamp_rect(image, left, top, right, bottom) else {
        return;
    };
    for y in t..=b {
        for x in l..=r {
            image.put_pixel(x, y, color);
        }
    }
}

/// Blend a rectangle toward black.
fn darken_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, keep: f32) {
    let Some((l, t, r, b)) = clamp_rect(image, left, top, right, bottom) else {
        return;
    };
    for y in t..=b {
        for x in l..=r {
            let pixel = image.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as f32 * keep).round() as u8;
            }
        }
    }
}

/// Draw `text` with its top-left corner at `(x, top)`.
fn draw_text(image: &mut RgbImage, mut x: i32, top: i32, text: &str, color: Rgb<u8>, scale: i32) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if x >= image.width() as i32 {
            break;
        }
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (pattern >> (GLYPH_W - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = x.saturating_add(col * scale);
                    let py = top.saturating_add(row as i32 * scale);
                    for dy in 0..scale {
                        for dx in 0..scale {
                            put(image, px.saturating_add(dx), py.saturating_add(dy), color);
                        }
                    }
                }
            }
        }
        x = x.saturating_add(GLYPH_ADVANCE * scale);
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
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
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00110, 0b00110],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn estimate(density_value: f64) -> DensityEstimate {
        DensityEstimate {
            person_count: 2,
            density_value,
            density_per_sqm: density_value * 2.0,
        }
    }

    fn count_color(image: &RgbImage, color: Rgb<u8>, region: (u32, u32, u32, u32)) -> usize {
        let (l, t, r, b) = region;
        (t..b)
            .flat_map(|y| (l..r).map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) == color)
            .count()
    }

    #[test]
    fn leaves_input_frame_untouched() {
        let frame = Frame::blank(400, 300, [200, 200, 200], 1);
        let detections = [Detection {
            bbox: BoundingBox::new(100, 150, 160, 250),
            confidence: 0.87,
        }];
        let out = FrameAnnotator::new().annotate(&frame, &detections, &estimate(0.9), 0.65);
        assert!(frame.image().pixels().all(|p| p.0 == [200, 200, 200]));
        assert_ne!(out.as_raw(), frame.image().as_raw());
    }

    #[test]
    fn draws_box_edges_and_label() {
        let frame = Frame::blank(400, 300, [0, 0, 0], 1);
        let detections = [Detection {
            bbox: BoundingBox::new(100, 150, 160, 250),
            confidence: 0.87,
        }];
        let out = FrameAnnotator::new().annotate(&frame, &detections, &estimate(0.1), 0.65);
        assert_eq!(*out.get_pixel(100, 200), BOX_COLOR);
        assert_eq!(*out.get_pixel(160, 200), BOX_COLOR);
        assert_eq!(*out.get_pixel(130, 250), BOX_COLOR);
        assert_eq!(*out.get_pixel(130, 200), Rgb([0, 0, 0]));
        // Label text sits on the filled band above the box.
        assert!(count_color(&out, WHITE, (100, 130, 170, 150)) > 0);
    }

    #[test]
    fn panel_darkens_background() {
        let frame = Frame::blank(400, 300, [100, 100, 100], 1);
        let out = FrameAnnotator::new().annotate(&frame, &[], &estimate(0.0), 0.65);
        assert_eq!(*out.get_pixel(340, 115), Rgb([30, 30, 30]));
        assert_eq!(*out.get_pixel(360, 115), Rgb([100, 100, 100]));
    }

    #[test]
    fn alert_switches_density_colour_and_adds_banner() {
        let frame = Frame::blank(400, 300, [0, 0, 0], 1);
        let calm = FrameAnnotator::new().annotate(&frame, &[], &estimate(0.3), 0.65);
        let alert = FrameAnnotator::new().annotate(&frame, &[], &estimate(0.7), 0.65);

        let density_row = (20, 46, 340, 60);
        assert!(count_color(&calm, GREEN, density_row) > 0);
        assert_eq!(count_color(&calm, RED, density_row), 0);
        assert!(count_color(&alert, RED, density_row) > 0);

        let banner_row = (20, 96, 340, 110);
        assert_eq!(count_color(&calm, RED, banner_row), 0);
        assert!(count_color(&alert, RED, banner_row) > 0);
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let frame = Frame::blank(4, 4, [10, 10, 10], 1);
        let detections = [Detection {
            bbox: BoundingBox::new(-20, -20, 50, 50),
            confidence: 0.5,
        }];
        let out = FrameAnnotator::new().annotate(&frame, &detections, &estimate(1.0), 0.65);
        assert_eq!(out.dimensions(), (4, 4));
    }

    #[test]
    fn extreme_box_coordinates_are_drawn_without_overflow() {
        let frame = Frame::blank(64, 48, [0, 0, 0], 1);
        let detections = [
            Detection {
                bbox: BoundingBox::new(i32::MAX - 3, i32::MAX - 3, i32::MAX, i32::MAX),
                confidence: 0.9,
            },
            Detection {
                bbox: BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX),
                confidence: 0.9,
            },
        ];
        let out = FrameAnnotator::new().annotate(&frame, &detections, &estimate(0.2), 0.65);
        assert_eq!(out.dimensions(), (64, 48));
    }
}
