//! Mark pointer positions on a snapshot before it goes to the oracle.
//!
//! The current pointer gets a ring; every earlier attempt that failed gets a
//! cross and its 1-based attempt number so the oracle can steer away from it.
use crate::perception::types::Snapshot;

const POINTER_COLOUR: [u8; 4] = [255, 40, 40, 230];
const FAILED_COLOUR: [u8; 4] = [255, 200, 0, 230];

/// Draw the pointer at `pointer` and crosses at `failed`, all in image space.
/// Points outside the frame are skipped.
pub fn annotate_attempts(
    snapshot: &Snapshot,
    pointer: Option<(f64, f64)>,
    failed: &[(f64, f64)],
) -> Snapshot {
    let mut canvas = (*snapshot.image).clone();
    let (w, _) = canvas.dimensions();
    let scale: u32 = if w > 1600 { 2 } else { 1 };
    let arm = 6 * scale as i32;

    for (i, &(fx, fy)) in failed.iter().enumerate() {
        let (x, y) = (fx.round() as i32, fy.round() as i32);
        draw_cross(&mut canvas, x, y, arm, FAILED_COLOUR, scale as i32);
        draw_label(&mut canvas, x + arm + 2, y - arm, &(i + 1).to_string(), FAILED_COLOUR, scale);
    }

    if let Some((px, py)) = pointer {
        let (x, y) = (px.round() as i32, py.round() as i32);
        draw_ring(&mut canvas, x, y, arm + 2, POINTER_COLOUR, scale as i32 + 1);
    }

    Snapshot {
        image: std::sync::Arc::new(canvas),
        meta: snapshot.meta,
        captured_at: snapshot.captured_at,
    }
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_cross(canvas: &mut image::RgbaImage, cx: i32, cy: i32, arm: i32, col: [u8; 4], thickness: i32) {
    for d in -arm..=arm {
        for t in 0..thickness {
            plot(canvas, cx + d, cy + d + t, col);
            plot(canvas, cx + d, cy - d + t, col);
        }
    }
}

fn draw_ring(canvas: &mut image::RgbaImage, cx: i32, cy: i32, radius: i32, col: [u8; 4], thickness: i32) {
    let outer = (radius * radius) as f64;
    let inner = ((radius - thickness).max(0) * (radius - thickness).max(0)) as f64;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dx * dx + dy * dy) as f64;
            if d2 <= outer && d2 >= inner {
                plot(canvas, cx + dx, cy + dy, col);
            }
        }
    }
}

fn draw_label(canvas: &mut image::RgbaImage, x: i32, y: i32, text: &str, col: [u8; 4], scale: u32) {
    let step = (5 * scale + 1) as i32;
    for (i, c) in text.chars().enumerate() {
        draw_digit(canvas, c, x + i as i32 * step, y, col, scale);
    }
}

/// 5×5 bitmap digits.
fn draw_digit(canvas: &mut image::RgbaImage, c: char, px: i32, py: i32, col: [u8; 4], scale: u32) {
    let Some(idx) = c.to_digit(10) else { return };
    let glyph = DIGITS[idx as usize];
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + (bit * scale + sx) as i32;
                    let y = py + (row as u32 * scale + sy) as i32;
                    plot(canvas, x, y, col);
                }
            }
        }
    }
}

fn plot(canvas: &mut image::RgbaImage, x: i32, y: i32, col: [u8; 4]) {
    let (w, h) = canvas.dimensions();
    if x < 0 || y < 0 || x as u32 >= w || y as u32 >= h {
        return;
    }
    let p = canvas.get_pixel_mut(x as u32, y as u32);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

const DIGITS: [[u8; 5]; 10] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
];
