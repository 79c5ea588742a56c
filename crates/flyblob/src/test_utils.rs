//! Synthetic score frames shared by unit tests.

use image::Luma;

use crate::label::ScoreImage;

/// Integer pixels within distance `r` of `(cx, cy)`, row-major.
pub(crate) fn disk_pixels(cx: f64, cy: f64, r: f64) -> Vec<(u32, u32)> {
    let y0 = (cy - r).floor().max(0.0) as u32;
    let x0 = (cx - r).floor().max(0.0) as u32;
    let y1 = (cy + r).ceil().max(0.0) as u32;
    let x1 = (cx + r).ceil().max(0.0) as u32;
    let mut out = Vec::new();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= r * r {
                out.push((x, y));
            }
        }
    }
    out
}

/// Set every in-frame pixel of the disk to `value`.
pub(crate) fn paint_disk(scores: &mut ScoreImage, cx: f64, cy: f64, r: f64, value: f32) {
    let (w, h) = scores.dimensions();
    for (x, y) in disk_pixels(cx, cy, r) {
        if x < w && y < h {
            scores.put_pixel(x, y, Luma([value]));
        }
    }
}

/// Set the horizontal run `x0..x1` on row `y` to `value`.
pub(crate) fn paint_row(scores: &mut ScoreImage, y: u32, x0: u32, x1: u32, value: f32) {
    for x in x0..x1 {
        scores.put_pixel(x, y, Luma([value]));
    }
}

/// Frame of `w × h` with the given disks `(cx, cy, r)` painted at `value`.
pub(crate) fn disk_frame(w: u32, h: u32, disks: &[(f64, f64, f64)], value: f32) -> ScoreImage {
    let mut scores = ScoreImage::new(w, h);
    for &(cx, cy, r) in disks {
        paint_disk(&mut scores, cx, cy, r, value);
    }
    scores
}
