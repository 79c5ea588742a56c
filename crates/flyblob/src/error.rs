//! Error types for geometry, configuration and per-frame input validation.
//!
//! Per-blob repair failures are not errors: a blob that cannot be fixed is
//! reported through [`crate::RepairStats`] and left in the detection set.

// ── Geometry ───────────────────────────────────────────────────────────────

/// Errors raised by the geometry kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// The ellipse covariance is singular (zero area), so a Mahalanobis
    /// distance cannot be evaluated.
    DegenerateEllipse {
        /// Semi-major axis of the offending ellipse.
        major: f64,
        /// Semi-minor axis of the offending ellipse.
        minor: f64,
    },
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DegenerateEllipse { major, minor } => write!(
                f,
                "degenerate ellipse (major={}, minor={}): covariance is not invertible",
                major, minor
            ),
        }
    }
}

impl std::error::Error for GeometryError {}

// ── Configuration ──────────────────────────────────────────────────────────

/// Inconsistent or invalid correction configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A parameter is NaN, infinite or negative.
    InvalidValue {
        /// Parameter name as it appears in the JSON config.
        name: &'static str,
        /// Offending value.
        value: f64,
    },
    /// Shape areas must satisfy `min_shape.area < mean_shape.area < max_shape.area`.
    ShapeOrdering {
        /// Minimum area.
        min_area: f64,
        /// Mean area.
        mean_area: f64,
        /// Maximum area.
        max_area: f64,
    },
    /// Hysteresis thresholds must satisfy `0 < low <= high`.
    ThresholdOrdering {
        /// Low foreground threshold.
        low: f64,
        /// High foreground threshold.
        high: f64,
    },
    /// At least one cluster per blob is required.
    NoClusters,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, value } => {
                write!(f, "invalid value for {}: {}", name, value)
            }
            Self::ShapeOrdering {
                min_area,
                mean_area,
                max_area,
            } => write!(
                f,
                "shape areas out of order: need min < mean < max, got {} / {} / {}",
                min_area, mean_area, max_area
            ),
            Self::ThresholdOrdering { low, high } => write!(
                f,
                "foreground thresholds out of order: need 0 < low <= high, got {} / {}",
                low, high
            ),
            Self::NoClusters => write!(f, "max_clusters_per_blob must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ── Frame input ────────────────────────────────────────────────────────────

/// Invalid per-frame input. Fails the whole frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Label image and score image dimensions differ.
    ShapeMismatch {
        /// Label image `[width, height]`.
        labels: [u32; 2],
        /// Score image `[width, height]`.
        scores: [u32; 2],
    },
    /// A label value exceeds the declared component count.
    LabelOutOfRange {
        /// Largest label found.
        label: u32,
        /// Declared number of components.
        component_count: u32,
    },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeMismatch { labels, scores } => write!(
                f,
                "label image is {}x{} but score image is {}x{}",
                labels[0], labels[1], scores[0], scores[1]
            ),
            Self::LabelOutOfRange {
                label,
                component_count,
            } => write!(
                f,
                "label {} exceeds component count {}",
                label, component_count
            ),
        }
    }
}

impl std::error::Error for FrameError {}
