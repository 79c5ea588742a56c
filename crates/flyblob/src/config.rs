//! Correction configuration: the per-run shape profile and mixture parameters.
//!
//! All repair logic assumes a configuration that passed
//! [`CorrectionConfig::validate`]; in particular
//! `min_shape.area < mean_shape.area < max_shape.area`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::Ellipse;
use crate::mixture::EmParams;

/// Area and semi-axis bounds of one reference shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeBounds {
    /// Ellipse area `π·major·minor` (pixels²).
    pub area: f64,
    /// Semi-major axis (pixels).
    pub major: f64,
    /// Semi-minor axis (pixels).
    pub minor: f64,
}

impl Default for ShapeBounds {
    fn default() -> Self {
        Self {
            area: 0.0,
            major: 0.0,
            minor: 0.0,
        }
    }
}

/// Expected single-animal shape and repair thresholds.
///
/// Read-only while a frame is being corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeProfile {
    /// Blobs with area below `min_shape.area` are repaired as too small.
    pub min_shape: ShapeBounds,
    /// Blobs with area above `max_shape.area` are repaired as too large;
    /// merges may not exceed any of the three bounds.
    pub max_shape: ShapeBounds,
    /// Typical single-animal shape; split candidates are scored against its area.
    pub mean_shape: ShapeBounds,
    /// Factor applied to `n_bg_std_thresh_low` when re-thresholding around a
    /// small blob. Values `>= 1` disable re-thresholding.
    pub min_back_thresh: f64,
    /// Low foreground threshold (background standard deviations).
    pub n_bg_std_thresh_low: f64,
    /// High foreground threshold (background standard deviations).
    pub n_bg_std_thresh: f64,
    /// Small blobs below this area may be deleted; split fragments at or
    /// below this pixel count are treated as noise.
    pub max_area_delete: f64,
    /// Fractional margin added to the merge search radius `4·major`.
    pub max_d_centers_extra: f64,
    /// A merge is accepted only when its penalty is below this.
    pub max_penalty_merge: f64,
    /// Upper bound on the number of mixture components per blob.
    pub max_clusters_per_blob: usize,
    /// Blobs larger than this are discarded instead of split.
    pub min_area_ignore: f64,
    /// Fractional margin of the re-thresholding box around a small blob.
    pub big_bounding_box_extra: f64,
}

impl Default for ShapeProfile {
    fn default() -> Self {
        Self {
            min_shape: ShapeBounds {
                area: 20.0,
                major: 2.0,
                minor: 1.0,
            },
            max_shape: ShapeBounds {
                area: 150.0,
                major: 12.0,
                minor: 6.0,
            },
            mean_shape: ShapeBounds {
                area: 60.0,
                major: 6.0,
                minor: 3.0,
            },
            min_back_thresh: 1.0,
            n_bg_std_thresh_low: 10.0,
            n_bg_std_thresh: 20.0,
            max_area_delete: 5.0,
            max_d_centers_extra: 0.1,
            max_penalty_merge: 40.0,
            max_clusters_per_blob: 5,
            min_area_ignore: 2500.0,
            big_bounding_box_extra: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Summary {
    mean: f64,
    std: f64,
}

impl Summary {
    fn of(values: impl Iterator<Item = f64> + Clone) -> Self {
        let n = values.clone().count() as f64;
        if n == 0.0 {
            return Self::default();
        }
        let mean = values.clone().sum::<f64>() / n;
        let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}

impl ShapeProfile {
    /// Re-estimate the shape bounds from clean single-animal detections.
    ///
    /// `mean_shape` becomes the sample mean of area, major and minor;
    /// `min_shape` / `max_shape` become `mean ∓ n_std·std` (the lower bound
    /// floored at zero). Thresholds are kept. An empty sample leaves the
    /// profile unchanged.
    pub fn with_bounds_from(mut self, ellipses: &[Ellipse], n_std: f64) -> Self {
        let live: Vec<&Ellipse> = ellipses.iter().filter(|e| !e.is_empty()).collect();
        if live.is_empty() {
            return self;
        }
        let area = Summary::of(live.iter().map(|e| e.area()));
        let major = Summary::of(live.iter().map(|e| e.major));
        let minor = Summary::of(live.iter().map(|e| e.minor));

        let lower = |s: Summary| (s.mean - n_std * s.std).max(0.0);
        let upper = |s: Summary| s.mean + n_std * s.std;
        self.mean_shape = ShapeBounds {
            area: area.mean,
            major: major.mean,
            minor: minor.mean,
        };
        self.min_shape = ShapeBounds {
            area: lower(area),
            major: lower(major),
            minor: lower(minor),
        };
        self.max_shape = ShapeBounds {
            area: upper(area),
            major: upper(major),
            minor: upper(minor),
        };
        self
    }

    /// Score threshold used when re-thresholding around a small blob.
    pub fn lowered_threshold(&self) -> f64 {
        self.min_back_thresh * self.n_bg_std_thresh_low
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            ("min_shape.area", self.min_shape.area),
            ("min_shape.major", self.min_shape.major),
            ("min_shape.minor", self.min_shape.minor),
            ("max_shape.area", self.max_shape.area),
            ("max_shape.major", self.max_shape.major),
            ("max_shape.minor", self.max_shape.minor),
            ("mean_shape.area", self.mean_shape.area),
            ("mean_shape.major", self.mean_shape.major),
            ("mean_shape.minor", self.mean_shape.minor),
            ("min_back_thresh", self.min_back_thresh),
            ("n_bg_std_thresh_low", self.n_bg_std_thresh_low),
            ("n_bg_std_thresh", self.n_bg_std_thresh),
            ("max_area_delete", self.max_area_delete),
            ("max_d_centers_extra", self.max_d_centers_extra),
            ("max_penalty_merge", self.max_penalty_merge),
            ("min_area_ignore", self.min_area_ignore),
            ("big_bounding_box_extra", self.big_bounding_box_extra),
        ];
        check_non_negative(&values)?;

        let (min_area, mean_area, max_area) =
            (self.min_shape.area, self.mean_shape.area, self.max_shape.area);
        if !(min_area < mean_area && mean_area < max_area) {
            return Err(ConfigError::ShapeOrdering {
                min_area,
                mean_area,
                max_area,
            });
        }

        let (low, high) = (self.n_bg_std_thresh_low, self.n_bg_std_thresh);
        if !(low > 0.0 && high >= low) {
            return Err(ConfigError::ThresholdOrdering { low, high });
        }

        if self.max_clusters_per_blob < 1 {
            return Err(ConfigError::NoClusters);
        }
        Ok(())
    }
}

fn check_non_negative(values: &[(&'static str, f64)]) -> Result<(), ConfigError> {
    for &(name, value) in values {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidValue { name, value });
        }
    }
    Ok(())
}

/// Full configuration of a [`BlobCorrector`](crate::BlobCorrector).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Shape profile and repair thresholds.
    pub profile: ShapeProfile,
    /// Parameters of the mixture split.
    pub mixture: EmParams,
}

impl CorrectionConfig {
    /// Configuration with the given profile and default mixture parameters.
    pub fn new(profile: ShapeProfile) -> Self {
        Self {
            profile,
            mixture: EmParams::default(),
        }
    }

    /// Check the invariants the repair passes rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profile.validate()?;
        check_non_negative(&[
            ("mixture.kmeans_thresh", self.mixture.kmeans_thresh),
            ("mixture.em_thresh", self.mixture.em_thresh),
            ("mixture.min_cov", self.mixture.min_cov),
        ])
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(CorrectionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn shape_areas_must_be_ordered() {
        let mut cfg = CorrectionConfig::default();
        cfg.profile.max_shape.area = cfg.profile.min_shape.area;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ShapeOrdering { .. })
        ));
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let mut cfg = CorrectionConfig::default();
        cfg.profile.n_bg_std_thresh = 5.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ThresholdOrdering {
                low: 10.0,
                high: 5.0
            })
        );

        cfg.profile.n_bg_std_thresh_low = 0.0;
        cfg.profile.n_bg_std_thresh = 0.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ThresholdOrdering { .. })
        ));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut cfg = CorrectionConfig::default();
        cfg.profile.max_penalty_merge = f64::NAN;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue {
                name: "max_penalty_merge",
                ..
            })
        ));

        let mut cfg = CorrectionConfig::default();
        cfg.mixture.min_cov = -1.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue {
                name: "mixture.min_cov",
                ..
            })
        ));
    }

    #[test]
    fn zero_clusters_rejected() {
        let mut cfg = CorrectionConfig::default();
        cfg.profile.max_clusters_per_blob = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::NoClusters));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: CorrectionConfig =
            serde_json::from_str(r#"{"profile": {"max_area_delete": 3.0}, "mixture": {"seed": 9}}"#)
                .expect("valid json");
        assert_eq!(cfg.profile.max_area_delete, 3.0);
        assert_eq!(cfg.profile.n_bg_std_thresh, 20.0);
        assert_eq!(cfg.mixture.seed, 9);
        assert_eq!(cfg.mixture.min_cov, 0.25);
    }

    #[test]
    fn json_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("flyblob-config-{}.json", std::process::id()));
        let cfg = CorrectionConfig::default();
        std::fs::write(&path, serde_json::to_string_pretty(&cfg).expect("serialize"))
            .expect("write temp config");
        let loaded = CorrectionConfig::from_json_file(&path).expect("load");
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn invalid_json_file_fails_fast() {
        let path = std::env::temp_dir().join(format!("flyblob-bad-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"profile": {"n_bg_std_thresh_low": -1.0}}"#)
            .expect("write temp config");
        let loaded = CorrectionConfig::from_json_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(loaded.is_err());
    }

    #[test]
    fn bounds_from_sample() {
        let sample = [
            Ellipse::new(0.0, 0.0, 4.0, 2.0, 0.0),
            Ellipse::new(0.0, 0.0, 6.0, 2.0, 0.0),
        ];
        let p = ShapeProfile::default().with_bounds_from(&sample, 2.0);
        let pi = std::f64::consts::PI;
        assert_relative_eq!(p.mean_shape.area, 10.0 * pi, epsilon = 1e-9);
        assert_relative_eq!(p.mean_shape.major, 5.0);
        assert_relative_eq!(p.min_shape.major, 3.0);
        assert_relative_eq!(p.max_shape.major, 7.0);
        assert_relative_eq!(p.min_shape.minor, 2.0);
        assert_relative_eq!(p.min_shape.area, 6.0 * pi, epsilon = 1e-9);
        assert_relative_eq!(p.max_shape.area, 14.0 * pi, epsilon = 1e-9);
        assert_eq!(p.n_bg_std_thresh, ShapeProfile::default().n_bg_std_thresh);
        assert!(CorrectionConfig::new(p).validate().is_ok());
    }

    #[test]
    fn empty_sample_keeps_profile() {
        let p = ShapeProfile::default().with_bounds_from(&[], 2.0);
        assert_eq!(p, ShapeProfile::default());
    }
}
