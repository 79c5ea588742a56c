//! Weighted-moment ellipse fitting.
//!
//! The per-region fit and the batched all-labels fit share one accumulator,
//! so both produce the same ellipse for the same pixels.

use crate::geometry::{covariance_to_ellipse, BoundingBox, Ellipse};
use crate::label::{LabelImage, ScoreImage};

/// Per-pixel coordinate grids `x`, `y`, `x²`, `y²`, `xy` for one frame shape.
///
/// Built once and reused while the frame shape stays the same.
#[derive(Debug, Clone)]
pub struct CoordinateGrids {
    width: u32,
    height: u32,
    x: Vec<f64>,
    y: Vec<f64>,
    x2: Vec<f64>,
    y2: Vec<f64>,
    xy: Vec<f64>,
}

impl CoordinateGrids {
    /// Precompute grids for a `width × height` frame.
    pub fn new(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        let mut grids = Self {
            width,
            height,
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            x2: Vec::with_capacity(n),
            y2: Vec::with_capacity(n),
            xy: Vec::with_capacity(n),
        };
        for row in 0..height {
            let yf = row as f64;
            for col in 0..width {
                let xf = col as f64;
                grids.x.push(xf);
                grids.y.push(yf);
                grids.x2.push(xf * xf);
                grids.y2.push(yf * yf);
                grids.xy.push(xf * yf);
            }
        }
        grids
    }

    /// Frame shape `(width, height)` these grids were built for.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Raw weighted sums `[w, wx, wy, wx², wy², wxy]`, plus the same sums with
/// unit weights used when the weights sum to zero.
#[derive(Debug, Clone, Copy, Default)]
struct RegionMoments {
    weighted: [f64; 6],
    uniform: [f64; 6],
}

impl RegionMoments {
    #[inline]
    fn add(&mut self, w: f64, x: f64, y: f64, x2: f64, y2: f64, xy: f64) {
        let terms = [1.0, x, y, x2, y2, xy];
        for (k, t) in terms.iter().enumerate() {
            self.weighted[k] += w * t;
            self.uniform[k] += t;
        }
    }

    #[inline]
    fn add_pixel(&mut self, w: f64, x: u32, y: u32) {
        let (xf, yf) = (x as f64, y as f64);
        self.add(w, xf, yf, xf * xf, yf * yf, xf * yf);
    }

    fn ellipse(&self) -> Option<Ellipse> {
        if self.uniform[0] <= 0.0 {
            return None;
        }
        let s = if self.weighted[0] > 0.0 {
            &self.weighted
        } else {
            &self.uniform
        };
        let mx = s[1] / s[0];
        let my = s[2] / s[0];
        let sxx = s[3] / s[0] - mx * mx;
        let syy = s[4] / s[0] - my * my;
        let sxy = s[5] / s[0] - mx * my;
        let (major, minor, angle) = covariance_to_ellipse(sxx, syy, sxy);
        Some(Ellipse::new(mx, my, major, minor, angle).with_clamped_axes())
    }
}

/// Fit an ellipse to pixels `(x, y)` weighted by `weights`.
///
/// Falls back to unit weights when the weights sum to zero. Returns `None`
/// for an empty pixel set.
pub fn fit_weighted_pixels(pixels: &[(u32, u32)], weights: &[f64]) -> Option<Ellipse> {
    debug_assert_eq!(pixels.len(), weights.len());
    let mut m = RegionMoments::default();
    for (&(x, y), &w) in pixels.iter().zip(weights) {
        m.add_pixel(w, x, y);
    }
    m.ellipse()
}

/// Fit an ellipse to the true pixels of a row-major `mask` over `bbox`,
/// weighted by the same-shape `weights`.
pub fn fit_masked_region(mask: &[bool], weights: &[f64], bbox: &BoundingBox) -> Option<Ellipse> {
    debug_assert_eq!(mask.len(), bbox.len());
    debug_assert_eq!(weights.len(), bbox.len());
    let mut m = RegionMoments::default();
    for (((x, y), &on), &w) in bbox.pixels().zip(mask).zip(weights) {
        if on {
            m.add_pixel(w, x, y);
        }
    }
    m.ellipse()
}

/// Fit one ellipse per label `1..=component_count`, weighted by `scores`,
/// in a single pass over the frame.
///
/// Entry `k - 1` belongs to label `k`. A label with no pixels yields a
/// tombstoned ellipse at the origin.
pub fn fit_all_regions(
    labels: &LabelImage,
    component_count: u32,
    scores: &ScoreImage,
    grids: &CoordinateGrids,
) -> Vec<Ellipse> {
    if component_count == 0 {
        return Vec::new();
    }
    debug_assert_eq!(labels.dimensions(), grids.dimensions());
    debug_assert_eq!(scores.dimensions(), grids.dimensions());

    let mut moments = vec![RegionMoments::default(); component_count as usize];
    for (i, (label, score)) in labels.as_raw().iter().zip(scores.as_raw()).enumerate() {
        let l = *label;
        if l == 0 || l > component_count {
            continue;
        }
        moments[(l - 1) as usize].add(
            *score as f64,
            grids.x[i],
            grids.y[i],
            grids.x2[i],
            grids.y2[i],
            grids.xy[i],
        );
    }

    moments
        .iter()
        .map(|m| {
            m.ellipse().unwrap_or_else(|| {
                let mut empty = Ellipse::new(0.0, 0.0, 0.0, 0.0, 0.0);
                empty.tombstone();
                empty
            })
        })
        .collect()
}
