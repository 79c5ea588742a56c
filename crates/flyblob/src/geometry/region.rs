//! Pixel regions around ellipses: bounding boxes and the 2σ inside test.

use super::types::{BoundingBox, Ellipse};
use crate::error::GeometryError;

/// Squared Mahalanobis radius of the "inside" region (2σ).
const INSIDE_RADIUS_SQ: f64 = 4.0;

fn clamped_box(cx: f64, cy: f64, half_w: f64, half_h: f64, dims: (u32, u32)) -> BoundingBox {
    let (width, height) = dims;
    if !(cx.is_finite() && cy.is_finite() && half_w.is_finite() && half_h.is_finite()) {
        return BoundingBox::default();
    }
    let lo = |c: f64, r: f64| (c - r).floor().max(0.0) as u32;
    let hi = |c: f64, r: f64, limit: u32| ((c + r).ceil() + 1.0).clamp(0.0, limit as f64) as u32;
    let col_min = lo(cx, half_w).min(width);
    let row_min = lo(cy, half_h).min(height);
    BoundingBox {
        row_min,
        row_max: hi(cy, half_h, height).max(row_min),
        col_min,
        col_max: hi(cx, half_w, width).max(col_min),
    }
}

/// Box of half-extent `2·major` around the center, clamped to the frame.
///
/// `dims` is `(width, height)`.
pub fn bounding_box_tight(ellipse: &Ellipse, dims: (u32, u32)) -> BoundingBox {
    let r = 2.0 * ellipse.major;
    clamped_box(ellipse.cx, ellipse.cy, r, r, dims)
}

/// Search box around a small blob, clamped to the frame.
///
/// Margins are half-extents from the center, as for [`bounding_box_tight`]:
/// `±4·major·(1+extra)` vertically and `±16·major·(1+extra)` horizontally.
/// The horizontal margin is four times the vertical one. This asymmetry is
/// inherited tuning and has not been validated against reference data.
pub fn bounding_box_loose(ellipse: &Ellipse, dims: (u32, u32), extra: f64) -> BoundingBox {
    let scale = ellipse.major * (1.0 + extra);
    let half_h = 4.0 * scale;
    let half_w = 16.0 * scale;
    clamped_box(ellipse.cx, ellipse.cy, half_w, half_h, dims)
}

/// Row-major mask over `bbox`: true where the squared Mahalanobis distance
/// from the ellipse center is at most 4.
///
/// Fails for zero-area ellipses; callers must guard before calling.
pub fn pixels_inside_ellipse(
    ellipse: &Ellipse,
    bbox: &BoundingBox,
) -> Result<Vec<bool>, GeometryError> {
    let degenerate = GeometryError::DegenerateEllipse {
        major: ellipse.major,
        minor: ellipse.minor,
    };
    if ellipse.is_empty() {
        return Err(degenerate);
    }
    let inv = ellipse
        .covariance()
        .try_inverse()
        .filter(|m| m.iter().all(|v| v.is_finite()))
        .ok_or(degenerate)?;

    let (a, b, d) = (inv[(0, 0)], inv[(0, 1)], inv[(1, 1)]);
    let mask = bbox
        .pixels()
        .map(|(x, y)| {
            let dx = x as f64 - ellipse.cx;
            let dy = y as f64 - ellipse.cy;
            a * dx * dx + 2.0 * b * dx * dy + d * dy * dy <= INSIDE_RADIUS_SQ
        })
        .collect();
    Ok(mask)
}
