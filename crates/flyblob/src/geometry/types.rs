//! Ellipse and pixel-box types.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

use super::covariance::{covariance_to_ellipse, ellipse_to_covariance};

/// Elliptical detection of one animal.
///
/// `major`/`minor` are standard-deviation-like semi-axes: for a uniformly
/// filled disk of radius `r` the moment fit gives `major = minor = r / 2`,
/// and the disk itself is the 2σ region (see
/// [`pixels_inside_ellipse`](super::pixels_inside_ellipse)).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x (column).
    pub cx: f64,
    /// Center y (row).
    pub cy: f64,
    /// Semi-major axis.
    pub major: f64,
    /// Semi-minor axis.
    pub minor: f64,
    /// Orientation of the major axis from +x, in radians.
    pub angle: f64,
    /// True when produced by splitting a larger blob.
    #[serde(default)]
    pub is_split: bool,
}

impl Ellipse {
    /// Axis floor applied to moment and mixture fits. Single-pixel or
    /// zero-variance regions would otherwise produce a zero axis.
    pub const MIN_AXIS: f64 = 0.125;

    /// Ellipse produced by direct fitting (`is_split = false`).
    pub fn new(cx: f64, cy: f64, major: f64, minor: f64, angle: f64) -> Self {
        Self {
            cx,
            cy,
            major,
            minor,
            angle,
            is_split: false,
        }
    }

    /// Build from a center and a 2×2 covariance, enforcing
    /// `major >= minor >= MIN_AXIS`.
    pub fn from_covariance(cx: f64, cy: f64, cov: &Matrix2<f64>) -> Self {
        let (major, minor, angle) = covariance_to_ellipse(cov[(0, 0)], cov[(1, 1)], cov[(0, 1)]);
        Self::new(cx, cy, major, minor, angle).with_clamped_axes()
    }

    /// `π · major · minor`.
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.major * self.minor
    }

    /// True for tombstoned (or otherwise zero-area) ellipses.
    pub fn is_empty(&self) -> bool {
        // NaN area counts as empty.
        !(self.area() > 0.0)
    }

    /// Mark as logically deleted: both axes become zero.
    pub fn tombstone(&mut self) {
        self.major = 0.0;
        self.minor = 0.0;
    }

    /// Covariance matrix with variances `major²` / `minor²` along the axes.
    pub fn covariance(&self) -> Matrix2<f64> {
        ellipse_to_covariance(self.major, self.minor, self.angle)
    }

    /// Center as `[x, y]`.
    pub fn center(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    /// Mark split provenance.
    pub fn as_split(mut self) -> Self {
        self.is_split = true;
        self
    }

    /// Replace NaN or sub-floor axes by [`Ellipse::MIN_AXIS`] and restore
    /// `major >= minor`.
    pub fn with_clamped_axes(mut self) -> Self {
        let clamp = |v: f64| {
            if v.is_nan() || v < Self::MIN_AXIS {
                Self::MIN_AXIS
            } else {
                v
            }
        };
        self.major = clamp(self.major);
        self.minor = clamp(self.minor);
        if self.minor > self.major {
            std::mem::swap(&mut self.major, &mut self.minor);
            self.angle += std::f64::consts::FRAC_PI_2;
        }
        self
    }
}

/// Half-open pixel box `[row_min, row_max) × [col_min, col_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    /// First row (inclusive).
    pub row_min: u32,
    /// Last row (exclusive).
    pub row_max: u32,
    /// First column (inclusive).
    pub col_min: u32,
    /// Last column (exclusive).
    pub col_max: u32,
}

impl BoundingBox {
    /// Box width in pixels.
    pub fn width(&self) -> u32 {
        self.col_max.saturating_sub(self.col_min)
    }

    /// Box height in pixels.
    pub fn height(&self) -> u32 {
        self.row_max.saturating_sub(self.row_min)
    }

    /// Number of pixels covered.
    pub fn len(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// True when the box covers no pixel.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether pixel `(x, y)` lies inside the box.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.col_min && x < self.col_max && y >= self.row_min && y < self.row_max
    }

    /// Row-major index of pixel `(x, y)` inside the box.
    #[inline]
    pub fn local_index(&self, x: u32, y: u32) -> usize {
        (y - self.row_min) as usize * self.width() as usize + (x - self.col_min) as usize
    }

    /// Pixels `(x, y)` in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.row_min..self.row_max)
            .flat_map(move |y| (self.col_min..self.col_max).map(move |x| (x, y)))
    }

    /// Smallest box containing both boxes. An empty box contributes nothing.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            row_min: self.row_min.min(other.row_min),
            row_max: self.row_max.max(other.row_max),
            col_min: self.col_min.min(other.col_min),
            col_max: self.col_max.max(other.col_max),
        }
    }

    /// Smallest box enclosing all pixels, or `None` for an empty set.
    pub fn enclosing(pixels: &[(u32, u32)]) -> Option<Self> {
        let (&(x0, y0), rest) = pixels.split_first()?;
        let mut bbox = Self {
            row_min: y0,
            row_max: y0 + 1,
            col_min: x0,
            col_max: x0 + 1,
        };
        for &(x, y) in rest {
            bbox.row_min = bbox.row_min.min(y);
            bbox.row_max = bbox.row_max.max(y + 1);
            bbox.col_min = bbox.col_min.min(x);
            bbox.col_max = bbox.col_max.max(x + 1);
        }
        Some(bbox)
    }
}
