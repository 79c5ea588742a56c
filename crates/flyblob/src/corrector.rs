//! Per-frame driver: fit, repair small blobs, repair large blobs.

use serde::Serialize;

use crate::config::CorrectionConfig;
use crate::error::{ConfigError, FrameError};
use crate::geometry::Ellipse;
use crate::label::{threshold_foreground, LabelImage, ScoreImage};
use crate::mixture::{MixtureSplitter, WeightedEm};
use crate::moments::{fit_all_regions, CoordinateGrids};
use crate::repair::{LargeBlobRepairer, SmallBlobRepairer};
use crate::segmentation::Segmentation;
use crate::stats::RepairStats;

/// Corrected detections of one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameDetections {
    /// One ellipse per detected animal; `ellipses[k - 1]` owns label `k`.
    pub ellipses: Vec<Ellipse>,
    /// Label image with contiguous labels `1..=ellipses.len()`.
    #[serde(skip)]
    pub labels: LabelImage,
    /// Repair counters for this frame.
    pub stats: RepairStats,
}

/// Blob correction for a sequence of frames.
///
/// Create once, correct many frames. Coordinate grids are cached and only
/// rebuilt when the frame shape changes.
///
/// # Examples
///
/// ```
/// use flyblob::{BlobCorrector, CorrectionConfig, ScoreImage};
///
/// let mut corrector = BlobCorrector::new(CorrectionConfig::default()).unwrap();
/// let scores = ScoreImage::new(64, 48);
/// let frame = corrector.detect(&scores);
/// assert!(frame.ellipses.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct BlobCorrector<M = WeightedEm> {
    config: CorrectionConfig,
    splitter: M,
    grids: Option<CoordinateGrids>,
}

impl BlobCorrector<WeightedEm> {
    /// Corrector using the default weighted-EM splitter.
    pub fn new(config: CorrectionConfig) -> Result<Self, ConfigError> {
        Self::with_splitter(config, WeightedEm)
    }
}

impl<M: MixtureSplitter> BlobCorrector<M> {
    /// Corrector with a custom mixture splitter.
    pub fn with_splitter(config: CorrectionConfig, splitter: M) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            splitter,
            grids: None,
        })
    }

    /// Current configuration.
    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    fn grids(&mut self, width: u32, height: u32) -> &CoordinateGrids {
        let stale = self
            .grids
            .as_ref()
            .map_or(true, |g| g.dimensions() != (width, height));
        if stale {
            tracing::debug!(width, height, "building coordinate grids");
        }
        let grids = match self.grids.take() {
            Some(g) if !stale => g,
            _ => CoordinateGrids::new(width, height),
        };
        self.grids.insert(grids)
    }

    /// Correct one frame given its connected-component labels.
    ///
    /// `labels` must hold values `0..=component_count` and match the shape
    /// of `scores`.
    pub fn correct(
        &mut self,
        labels: LabelImage,
        component_count: u32,
        scores: &ScoreImage,
    ) -> Result<FrameDetections, FrameError> {
        if labels.dimensions() != scores.dimensions() {
            let (lw, lh) = labels.dimensions();
            let (sw, sh) = scores.dimensions();
            return Err(FrameError::ShapeMismatch {
                labels: [lw, lh],
                scores: [sw, sh],
            });
        }
        if let Some(&label) = labels.as_raw().iter().max() {
            if label > component_count {
                return Err(FrameError::LabelOutOfRange {
                    label,
                    component_count,
                });
            }
        }
        Ok(self.correct_checked(labels, component_count, scores))
    }

    /// Threshold `scores` with hysteresis, label the foreground and correct.
    pub fn detect(&mut self, scores: &ScoreImage) -> FrameDetections {
        let profile = &self.config.profile;
        let (labels, count) =
            threshold_foreground(scores, profile.n_bg_std_thresh_low, profile.n_bg_std_thresh);
        self.correct_checked(labels, count, scores)
    }

    fn correct_checked(
        &mut self,
        labels: LabelImage,
        component_count: u32,
        scores: &ScoreImage,
    ) -> FrameDetections {
        let (width, height) = scores.dimensions();
        let grids = self.grids(width, height);
        let ellipses = fit_all_regions(&labels, component_count, scores, grids);
        let mut seg = Segmentation::new(labels, ellipses);

        let profile = &self.config.profile;
        let mut stats = SmallBlobRepairer::new(profile, scores).run(&mut seg);
        let large = LargeBlobRepairer::new(profile, &self.config.mixture, &self.splitter, scores)
            .run(&mut seg);
        stats.accumulate(&large);

        let (ellipses, labels) = seg.into_dense();
        tracing::info!(
            components = component_count,
            detections = ellipses.len(),
            merged = stats.nsmall_merged,
            deleted = stats.nsmall_deleted,
            split = stats.nlarge_split,
            "frame corrected"
        );
        FrameDetections {
            ellipses,
            labels,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ShapeBounds, ShapeProfile};
    use crate::label::label_mask;
    use crate::moments::fit_weighted_pixels;
    use crate::test_utils::{disk_frame, disk_pixels, paint_row};
    use approx::assert_relative_eq;

    fn disk_area(r: f64) -> f64 {
        let px = disk_pixels(50.0, 50.0, r);
        fit_weighted_pixels(&px, &vec![1.0; px.len()])
            .expect("fit")
            .area()
    }

    fn config() -> CorrectionConfig {
        let disk = disk_area(20.0);
        CorrectionConfig::new(ShapeProfile {
            min_shape: ShapeBounds {
                area: 0.5 * disk,
                major: 5.0,
                minor: 5.0,
            },
            mean_shape: ShapeBounds {
                area: disk,
                major: 10.0,
                minor: 10.0,
            },
            max_shape: ShapeBounds {
                area: 1.5 * disk,
                major: 40.0,
                minor: 40.0,
            },
            min_area_ignore: 10.0 * disk,
            ..ShapeProfile::default()
        })
    }

    /// Fused pair, a lone disk and a noise speck.
    fn frame() -> ScoreImage {
        let mut scores = disk_frame(
            200,
            150,
            &[(40.0, 50.0, 20.0), (100.0, 50.0, 20.0), (150.0, 115.0, 20.0)],
            30.0,
        );
        paint_row(&mut scores, 50, 61, 80, 30.0);
        paint_row(&mut scores, 140, 10, 12, 30.0);
        scores
    }

    #[test]
    fn corrects_mixed_frame() {
        let scores = frame();
        let mut corrector = BlobCorrector::new(config()).expect("valid config");
        let out = corrector.detect(&scores);

        assert_eq!(out.ellipses.len(), 3);
        assert_eq!(out.stats.nsmall_deleted, 1);
        assert_eq!(out.stats.nlarge_split, 1);
        assert_eq!(out.ellipses.iter().filter(|e| e.is_split).count(), 2);
        for e in &out.ellipses {
            assert_relative_eq!(e.area(), disk_area(20.0), max_relative = 0.1);
        }

        let max_label = out.labels.as_raw().iter().copied().max().unwrap_or(0);
        assert_eq!(max_label as usize, out.ellipses.len());
        assert_eq!(out.labels.get_pixel(10, 140)[0], 0);
    }

    #[test]
    fn correct_matches_detect_for_external_labels() {
        let scores = frame();
        let (w, h) = scores.dimensions();
        let mask: Vec<bool> = scores.pixels().map(|p| p[0] >= 10.0).collect();
        let (labels, count) = label_mask(&mask, w, h);

        let mut corrector = BlobCorrector::new(config()).expect("valid config");
        let a = corrector.correct(labels, count, &scores).expect("valid frame");
        let b = corrector.detect(&scores);
        assert_eq!(a.ellipses, b.ellipses);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn shape_mismatch_fails_frame() {
        let mut corrector = BlobCorrector::new(config()).expect("valid config");
        let err = corrector
            .correct(LabelImage::new(10, 10), 0, &ScoreImage::new(10, 12))
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::ShapeMismatch {
                labels: [10, 10],
                scores: [10, 12]
            }
        );
    }

    #[test]
    fn label_above_count_fails_frame() {
        let mut labels = LabelImage::new(8, 8);
        labels.put_pixel(3, 3, image::Luma([4]));
        let mut corrector = BlobCorrector::new(config()).expect("valid config");
        let err = corrector
            .correct(labels, 2, &ScoreImage::new(8, 8))
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::LabelOutOfRange {
                label: 4,
                component_count: 2
            }
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = config();
        cfg.profile.mean_shape.area = cfg.profile.max_shape.area * 2.0;
        assert!(matches!(
            BlobCorrector::new(cfg),
            Err(ConfigError::ShapeOrdering { .. })
        ));
    }

    #[test]
    fn grids_follow_frame_shape() {
        let mut corrector = BlobCorrector::new(config()).expect("valid config");
        corrector.detect(&ScoreImage::new(20, 10));
        assert_eq!(corrector.grids.as_ref().map(|g| g.dimensions()), Some((20, 10)));
        corrector.detect(&ScoreImage::new(30, 15));
        assert_eq!(corrector.grids.as_ref().map(|g| g.dimensions()), Some((30, 15)));
    }
}
