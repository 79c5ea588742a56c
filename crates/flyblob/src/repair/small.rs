//! Repair of blobs smaller than `min_shape.area`.
//!
//! Each small blob tries, in order: re-thresholding at a lower score,
//! merging into a nearby blob, deletion as noise.

use std::collections::BTreeSet;

use crate::config::ShapeProfile;
use crate::geometry::{bounding_box_loose, BoundingBox, Ellipse};
use crate::label::{label_box_above, ScoreImage};
use crate::moments::fit_weighted_pixels;
use crate::segmentation::{DetectionId, Segmentation};
use crate::stats::RepairStats;

use super::merge::best_merge;

/// Result of re-thresholding around a small blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Regrowth {
    /// Fit of the grown region.
    pub ellipse: Ellipse,
    /// Pixels of the grown region.
    pub pixels: Vec<(u32, u32)>,
    /// True when the grown region reaches pixels owned by another blob.
    pub contaminated: bool,
}

/// Small-blob repair pass over one frame.
#[derive(Debug, Clone, Copy)]
pub struct SmallBlobRepairer<'a> {
    profile: &'a ShapeProfile,
    scores: &'a ScoreImage,
}

impl<'a> SmallBlobRepairer<'a> {
    /// Repairer reading `scores` under `profile`.
    pub fn new(profile: &'a ShapeProfile, scores: &'a ScoreImage) -> Self {
        Self { profile, scores }
    }

    fn is_small(&self, e: &Ellipse) -> bool {
        !e.is_empty() && e.area() < self.profile.min_shape.area
    }

    /// Repair every small blob, lowest id first, then compact.
    pub fn run(&self, seg: &mut Segmentation) -> RepairStats {
        let mut stats = RepairStats::default();
        let mut queue: BTreeSet<DetectionId> = seg
            .detections()
            .iter()
            .filter(|(_, e)| self.is_small(e))
            .map(|(id, _)| id)
            .collect();

        while let Some(id) = queue.pop_first() {
            let Some(ellipse) = seg.ellipse(id).filter(|e| self.is_small(e)) else {
                continue;
            };
            if self.repair_one(seg, id, ellipse, &mut stats) {
                queue.insert(id);
            }
        }

        let removed = seg.compact();
        tracing::debug!(removed, ?stats, "small-blob pass done");
        stats
    }

    /// Returns true when `id` should be revisited.
    fn repair_one(
        &self,
        seg: &mut Segmentation,
        id: DetectionId,
        ellipse: Ellipse,
        stats: &mut RepairStats,
    ) -> bool {
        let min_area = self.profile.min_shape.area;
        let mut candidate = ellipse;

        if let Some(regrowth) = self.try_lower_threshold(seg, id, &ellipse) {
            if regrowth.contaminated {
                tracing::debug!(%id, "lowered threshold reaches another blob");
            } else {
                candidate = regrowth.ellipse;
                if candidate.area() >= min_area {
                    tracing::debug!(%id, area = candidate.area(), "fixed by lowering threshold");
                    seg.grow(id, &regrowth.pixels, candidate);
                    stats.nsmall_lowerthresh += 1;
                    return false;
                }
            }
        }

        if let Some(merge) = best_merge(seg, self.scores, self.profile, id, &ellipse) {
            tracing::debug!(
                %id,
                absorbed = %merge.absorbed,
                penalty = merge.penalty,
                "merged small blob"
            );
            seg.merge(id, merge.absorbed, merge.merged);
            stats.nsmall_merged += 1;
            return merge.merged.area() < min_area;
        }

        if candidate.area() < self.profile.max_area_delete {
            tracing::debug!(%id, area = candidate.area(), "deleted small blob");
            seg.tombstone(id);
            stats.nsmall_deleted += 1;
        } else {
            tracing::warn!(%id, area = candidate.area(), "small blob left unresolved");
            stats.nsmall_notfixed += 1;
        }
        false
    }

    /// Re-threshold the loose box around `id` at
    /// `min_back_thresh · n_bg_std_thresh_low` and fit the region holding
    /// most of the blob's pixels.
    ///
    /// Returns `None` when re-thresholding is disabled (`min_back_thresh >= 1`)
    /// or the blob has no pixels.
    pub fn try_lower_threshold(
        &self,
        seg: &Segmentation,
        id: DetectionId,
        ellipse: &Ellipse,
    ) -> Option<Regrowth> {
        if self.profile.min_back_thresh >= 1.0 {
            return None;
        }
        let own = seg.pixels_of(id);
        let own_box = BoundingBox::enclosing(&own)?;
        let extra = self.profile.big_bounding_box_extra;
        let bbox = bounding_box_loose(ellipse, seg.dimensions(), extra).union(&own_box);

        let threshold = self.profile.lowered_threshold();
        let (local, count) =
            label_box_above(self.scores, &bbox, threshold, |x, y| seg.owner(x, y) == Some(id));

        let mut votes = vec![0usize; count as usize + 1];
        for &(x, y) in &own {
            votes[local.get_pixel(x - bbox.col_min, y - bbox.row_min)[0] as usize] += 1;
        }
        let spread = votes[1..].iter().filter(|&&v| v > 0).count();
        if spread > 1 {
            tracing::warn!(
                %id,
                labels = spread,
                "blob pixels spread over several regions at a lower threshold"
            );
        }
        let winner = (1..votes.len()).fold(0, |best, l| {
            if votes[l] > votes[best] {
                l
            } else {
                best
            }
        });
        if winner == 0 {
            return None;
        }

        let pixels: Vec<(u32, u32)> = bbox
            .pixels()
            .filter(|&(x, y)| {
                local.get_pixel(x - bbox.col_min, y - bbox.row_min)[0] as usize == winner
            })
            .collect();
        let weights: Vec<f64> = pixels
            .iter()
            .map(|&(x, y)| self.scores.get_pixel(x, y)[0] as f64)
            .collect();
        let ellipse = fit_weighted_pixels(&pixels, &weights)?;
        let contaminated = pixels
            .iter()
            .any(|&(x, y)| matches!(seg.owner(x, y), Some(o) if o != id));
        Some(Regrowth {
            ellipse,
            pixels,
            contaminated,
        })
    }
}
