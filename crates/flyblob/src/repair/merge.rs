//! Merge candidates and the merge penalty of a small blob.

use crate::config::ShapeProfile;
use crate::geometry::{bounding_box_tight, pixels_inside_ellipse, BoundingBox, Ellipse};
use crate::label::ScoreImage;
use crate::moments::fit_weighted_pixels;
use crate::segmentation::{DetectionId, Segmentation};

/// Best merge found for a small blob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeProposal {
    /// Neighbor that would be absorbed.
    pub absorbed: DetectionId,
    /// Moment fit of the union of both blobs.
    pub merged: Ellipse,
    /// Penalty of the merge; lower is more plausible.
    pub penalty: f64,
}

/// Live neighbors of `id` whose centers lie within `4·major·(1+extra)` of
/// its center, in id order.
///
/// Filters on x-distance, then y-distance, then Euclidean distance.
pub fn merge_candidates(
    seg: &Segmentation,
    id: DetectionId,
    ellipse: &Ellipse,
    profile: &ShapeProfile,
) -> Vec<DetectionId> {
    let reach = 4.0 * ellipse.major * (1.0 + profile.max_d_centers_extra);
    seg.detections()
        .iter()
        .filter(|(other, e)| *other != id && !e.is_empty())
        .filter(|(_, e)| (e.cx - ellipse.cx).abs() <= reach)
        .filter(|(_, e)| (e.cy - ellipse.cy).abs() <= reach)
        .filter(|(_, e)| (e.cx - ellipse.cx).hypot(e.cy - ellipse.cy) <= reach)
        .map(|(other, _)| other)
        .collect()
}

fn inside_or_nothing(ellipse: &Ellipse, bbox: &BoundingBox) -> Vec<bool> {
    if ellipse.is_empty() {
        return vec![false; bbox.len()];
    }
    pixels_inside_ellipse(ellipse, bbox).unwrap_or_else(|_| vec![false; bbox.len()])
}

/// Penalty of merging `other` into `id`, with the merged fit.
///
/// The penalty sums `max(0, 1 - score / n_bg_std_thresh_low)` over pixels
/// inside the merged 2σ region that neither blob owns and neither blob's
/// own 2σ region covers. A merged fit exceeding any `max_shape` bound
/// costs `max_penalty_merge + 1`. An empty union costs nothing and keeps
/// `ellipse`.
pub fn merge_penalty(
    seg: &Segmentation,
    scores: &ScoreImage,
    profile: &ShapeProfile,
    id: DetectionId,
    ellipse: &Ellipse,
    other: DetectionId,
) -> (f64, Ellipse) {
    let mut pixels = seg.pixels_of(id);
    pixels.extend(seg.pixels_of(other));
    let weights: Vec<f64> = pixels
        .iter()
        .map(|&(x, y)| scores.get_pixel(x, y)[0] as f64)
        .collect();
    let Some(merged) = fit_weighted_pixels(&pixels, &weights) else {
        return (0.0, *ellipse);
    };

    let rejected = profile.max_penalty_merge + 1.0;
    let max = &profile.max_shape;
    if merged.area() > max.area || merged.major > max.major || merged.minor > max.minor {
        return (rejected, merged);
    }

    let bbox = bounding_box_tight(&merged, seg.dimensions());
    let Ok(inside_merged) = pixels_inside_ellipse(&merged, &bbox) else {
        return (rejected, merged);
    };
    let inside_own = inside_or_nothing(ellipse, &bbox);
    let other_ellipse = seg.ellipse(other).unwrap_or(*ellipse);
    let inside_other = inside_or_nothing(&other_ellipse, &bbox);

    let low = profile.n_bg_std_thresh_low;
    let mut penalty = 0.0;
    for (k, (x, y)) in bbox.pixels().enumerate() {
        if !inside_merged[k] || inside_own[k] || inside_other[k] {
            continue;
        }
        if matches!(seg.owner(x, y), Some(o) if o == id || o == other) {
            continue;
        }
        let score = scores.get_pixel(x, y)[0] as f64;
        penalty += (1.0 - score / low).max(0.0);
    }
    (penalty, merged)
}

/// Lowest-penalty merge for `id`, if it beats `max_penalty_merge`.
///
/// Ties go to the lower id.
pub fn best_merge(
    seg: &Segmentation,
    scores: &ScoreImage,
    profile: &ShapeProfile,
    id: DetectionId,
    ellipse: &Ellipse,
) -> Option<MergeProposal> {
    let mut best: Option<MergeProposal> = None;
    for other in merge_candidates(seg, id, ellipse, profile) {
        let (penalty, merged) = merge_penalty(seg, scores, profile, id, ellipse, other);
        tracing::trace!(%id, %other, penalty, "merge penalty");
        if best.map_or(true, |b| penalty < b.penalty) {
            best = Some(MergeProposal {
                absorbed: other,
                merged,
                penalty,
            });
        }
    }
    best.filter(|b| b.penalty < profile.max_penalty_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::label_mask;
    use crate::moments::{fit_all_regions, CoordinateGrids};
    use crate::test_utils::paint_row;
    use approx::assert_relative_eq;

    fn segment(scores: &ScoreImage) -> Segmentation {
        let (w, h) = scores.dimensions();
        let mask: Vec<bool> = scores.pixels().map(|p| p[0] > 0.0).collect();
        let (labels, count) = label_mask(&mask, w, h);
        let ellipses = fit_all_regions(&labels, count, scores, &CoordinateGrids::new(w, h));
        Segmentation::new(labels, ellipses)
    }

    fn profile() -> ShapeProfile {
        ShapeProfile {
            max_d_centers_extra: 0.5,
            max_penalty_merge: 100.0,
            ..ShapeProfile::default()
        }
    }

    #[test]
    fn candidates_respect_reach() {
        let mut scores = ScoreImage::new(60, 10);
        paint_row(&mut scores, 5, 10, 14, 15.0);
        paint_row(&mut scores, 5, 16, 19, 15.0);
        paint_row(&mut scores, 5, 40, 43, 15.0);
        let seg = segment(&scores);
        let id = DetectionId::from_label(1).expect("label");
        let e = seg.ellipse(id).expect("fit");
        let near = merge_candidates(&seg, id, &e, &profile());
        assert_eq!(near, vec![DetectionId::from_label(2).expect("label")]);
    }

    #[test]
    fn gap_pixels_are_penalized() {
        let mut scores = ScoreImage::new(40, 10);
        paint_row(&mut scores, 5, 10, 14, 15.0);
        paint_row(&mut scores, 5, 16, 19, 15.0);
        let seg = segment(&scores);
        let (a, b) = (
            DetectionId::from_label(1).expect("label"),
            DetectionId::from_label(2).expect("label"),
        );
        let e = seg.ellipse(a).expect("fit");
        let (penalty, merged) = merge_penalty(&seg, &scores, &profile(), a, &e, b);

        let mut union = seg.pixels_of(a);
        union.extend(seg.pixels_of(b));
        let expected = fit_weighted_pixels(&union, &vec![15.0; union.len()]).expect("fit");
        assert_relative_eq!(merged.cx, expected.cx, epsilon = 1e-9);
        assert_relative_eq!(merged.area(), expected.area(), epsilon = 1e-9);
        // At least the background pixels at x = 14 and 15 are invented.
        assert!(penalty >= 1.0, "penalty {penalty}");
        assert!(penalty < profile().max_penalty_merge);

        let best = best_merge(&seg, &scores, &profile(), a, &e).expect("merge");
        assert_eq!(best.absorbed, b);
    }

    #[test]
    fn oversized_union_is_rejected() {
        let mut scores = ScoreImage::new(40, 10);
        paint_row(&mut scores, 5, 10, 14, 15.0);
        paint_row(&mut scores, 5, 16, 19, 15.0);
        let seg = segment(&scores);
        let (a, b) = (
            DetectionId::from_label(1).expect("label"),
            DetectionId::from_label(2).expect("label"),
        );
        let mut p = profile();
        p.max_shape.major = 1.0;
        let e = seg.ellipse(a).expect("fit");
        let (penalty, _) = merge_penalty(&seg, &scores, &p, a, &e, b);
        assert_eq!(penalty, p.max_penalty_merge + 1.0);
        assert!(best_merge(&seg, &scores, &p, a, &e).is_none());
    }

    #[test]
    fn bright_gap_costs_nothing() {
        let mut scores = ScoreImage::new(40, 10);
        paint_row(&mut scores, 5, 10, 14, 15.0);
        paint_row(&mut scores, 5, 16, 19, 15.0);
        let seg = segment(&scores);
        // Brighten the background after labeling: invented pixels are now
        // above the low threshold.
        let mut bright = scores.clone();
        for p in bright.pixels_mut() {
            if p[0] == 0.0 {
                p[0] = 12.0;
            }
        }
        let (a, b) = (
            DetectionId::from_label(1).expect("label"),
            DetectionId::from_label(2).expect("label"),
        );
        let e = seg.ellipse(a).expect("fit");
        let (penalty, _) = merge_penalty(&seg, &bright, &profile(), a, &e, b);
        assert_eq!(penalty, 0.0);
    }
}
