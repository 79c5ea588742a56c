//! Split proposals for an oversized blob: raise the threshold, or fit a
//! Gaussian mixture.

use crate::config::ShapeProfile;
use crate::geometry::{BoundingBox, Ellipse};
use crate::label::{label_mask, ScoreImage};
use crate::mixture::{hard_assignments, EmParams, GaussianComponent, MixtureSplitter};
use crate::moments::fit_weighted_pixels;

/// Number of thresholds tried by [`threshold_split`].
pub const THRESHOLD_STEPS: usize = 20;

/// Area error charged for a mixture component smaller than `min_shape.area`.
pub const SLIVER_PENALTY: f64 = 10_000.0;

/// Pixels of one blob with their scores.
#[derive(Debug, Clone, Default)]
pub struct BlobPixels {
    /// Pixel coordinates `(x, y)`, row-major.
    pub pixels: Vec<(u32, u32)>,
    /// Same coordinates as mixture points.
    pub points: Vec<[f64; 2]>,
    /// Score of each pixel.
    pub weights: Vec<f64>,
}

impl BlobPixels {
    /// Gather `pixels` and their scores.
    pub fn new(pixels: Vec<(u32, u32)>, scores: &ScoreImage) -> Self {
        let points = pixels.iter().map(|&(x, y)| [x as f64, y as f64]).collect();
        let weights = pixels
            .iter()
            .map(|&(x, y)| scores.get_pixel(x, y)[0] as f64)
            .collect();
        Self {
            pixels,
            points,
            weights,
        }
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// True for a blob without pixels.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// How a split was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    /// Sub-components at a raised threshold, refined by one EM step.
    Threshold,
    /// Fresh mixture fit with the best component count.
    Mixture {
        /// Chosen number of components.
        k: usize,
    },
}

/// A proposed split: one ellipse and its hard-assigned pixels per piece.
///
/// Pieces may be empty. The first piece is installed regardless; later empty
/// pieces are skipped.
#[derive(Debug, Clone)]
pub struct SplitProposal {
    /// Split pieces in component order.
    pub pieces: Vec<(Ellipse, Vec<(u32, u32)>)>,
    /// Strategy that produced the split.
    pub method: SplitMethod,
}

fn pieces_from_assignment(
    blob: &BlobPixels,
    components: &[GaussianComponent],
    assignment: &[usize],
) -> Vec<(Ellipse, Vec<(u32, u32)>)> {
    let mut pieces: Vec<(Ellipse, Vec<(u32, u32)>)> = components
        .iter()
        .map(|c| (c.to_ellipse().as_split(), Vec::new()))
        .collect();
    for (&p, &k) in blob.pixels.iter().zip(assignment) {
        pieces[k].1.push(p);
    }
    pieces
}

fn assignment_counts(assignment: &[usize], k: usize) -> Vec<usize> {
    let mut counts = vec![0usize; k];
    for &a in assignment {
        counts[a] += 1;
    }
    counts
}

/// Thresholds `low..=high` in [`THRESHOLD_STEPS`] equal steps.
fn sweep(low: f64, high: f64) -> impl Iterator<Item = f64> {
    let step = (high - low) / (THRESHOLD_STEPS - 1) as f64;
    (0..THRESHOLD_STEPS).map(move |i| low + step * i as f64)
}

/// Pixel groups of the blob that stay connected above `threshold`, with
/// groups of at most `max_area_delete` pixels dropped.
fn components_above(
    blob: &BlobPixels,
    bbox: &BoundingBox,
    member: &[bool],
    scores: &ScoreImage,
    threshold: f64,
    max_area_delete: f64,
) -> Vec<Vec<(u32, u32)>> {
    let mask: Vec<bool> = bbox
        .pixels()
        .zip(member)
        .map(|((x, y), &m)| m && scores.get_pixel(x, y)[0] as f64 >= threshold)
        .collect();
    let (local, count) = label_mask(&mask, bbox.width(), bbox.height());
    let mut groups = vec![Vec::new(); count as usize];
    for &(x, y) in &blob.pixels {
        let l = local.get_pixel(x - bbox.col_min, y - bbox.row_min)[0];
        if l > 0 {
            groups[(l - 1) as usize].push((x, y));
        }
    }
    groups.retain(|g| g.len() as f64 > max_area_delete);
    groups
}

/// Split by raising the foreground threshold inside the blob.
///
/// Sweeps from `n_bg_std_thresh_low` to `min(n_bg_std_thresh, max score)`
/// and stops at the first threshold leaving two or more sub-components
/// larger than `max_area_delete`. Their moment fits seed one
/// responsibilities / re-estimate / responsibilities pass over all blob
/// pixels; components that end up with fewer than `max(1, max_area_delete)`
/// pixels are dropped.
pub fn threshold_split<M: MixtureSplitter>(
    splitter: &M,
    blob: &BlobPixels,
    scores: &ScoreImage,
    profile: &ShapeProfile,
    params: &EmParams,
) -> Option<SplitProposal> {
    let bbox = BoundingBox::enclosing(&blob.pixels)?;
    let mut member = vec![false; bbox.len()];
    for &(x, y) in &blob.pixels {
        member[bbox.local_index(x, y)] = true;
    }
    let max_score = blob.weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let high = profile.n_bg_std_thresh.min(max_score);

    let groups = sweep(profile.n_bg_std_thresh_low, high)
        .map(|t| components_above(blob, &bbox, &member, scores, t, profile.max_area_delete))
        .find(|groups| groups.len() >= 2)?;

    let total: usize = groups.iter().map(Vec::len).sum();
    let mut components: Vec<GaussianComponent> = groups
        .iter()
        .filter_map(|g| {
            let w: Vec<f64> = g.iter().map(|&(x, y)| scores.get_pixel(x, y)[0] as f64).collect();
            let e = fit_weighted_pixels(g, &w)?;
            Some(GaussianComponent::from_ellipse(&e, g.len() as f64 / total as f64))
        })
        .collect();

    if components.len() < 2 {
        return None;
    }
    let (resp, _) = splitter.responsibilities(&components, &blob.points);
    splitter.reestimate(&mut components, &resp, &blob.points, &blob.weights, params.min_cov);
    let (mut resp, _) = splitter.responsibilities(&components, &blob.points);
    let mut assignment = hard_assignments(&resp);

    let min_pixels = profile.max_area_delete.max(1.0);
    let counts = assignment_counts(&assignment, components.len());
    if counts.iter().any(|&c| (c as f64) < min_pixels) {
        components = components
            .into_iter()
            .zip(&counts)
            .filter(|&(_, &c)| c as f64 >= min_pixels)
            .map(|(c, _)| c)
            .collect();
        resp = splitter.responsibilities(&components, &blob.points).0;
        assignment = hard_assignments(&resp);
    }
    if components.len() < 2 {
        return None;
    }

    Some(SplitProposal {
        pieces: pieces_from_assignment(blob, &components, &assignment),
        method: SplitMethod::Threshold,
    })
}

fn area_error(components: &[GaussianComponent], profile: &ShapeProfile) -> f64 {
    components
        .iter()
        .map(|c| {
            let area = c.to_ellipse().area();
            if area < profile.min_shape.area {
                SLIVER_PENALTY
            } else {
                (profile.mean_shape.area - area).abs()
            }
        })
        .sum()
}

/// Split by fitting mixtures with `k = 2, 3, …` components.
///
/// Each `k` is fitted from scratch. The error of a fit sums, per component,
/// [`SLIVER_PENALTY`] below `min_shape.area` and the distance to
/// `mean_shape.area` otherwise. Stops at the first `k` that does not
/// improve on `k - 1`; returns `None` when no `k >= 2` beats keeping the
/// blob whole.
pub fn mixture_split<M: MixtureSplitter>(
    splitter: &M,
    blob: &BlobPixels,
    ellipse: &Ellipse,
    profile: &ShapeProfile,
    params: &EmParams,
) -> Option<SplitProposal> {
    let max_k = profile.max_clusters_per_blob.min(blob.len());
    let mut best_error = (ellipse.area() - profile.mean_shape.area).abs();
    let mut best = None;
    for k in 2..=max_k {
        let Some(fit) = splitter.cluster(&blob.points, &blob.weights, k, params) else {
            break;
        };
        let error = area_error(&fit.components, profile);
        tracing::trace!(k, error, best_error, "mixture split error");
        if !(error < best_error) {
            break;
        }
        best_error = error;
        best = Some((k, fit));
    }

    let (k, fit) = best?;
    let assignment = hard_assignments(&fit.responsibilities);
    Some(SplitProposal {
        pieces: pieces_from_assignment(blob, &fit.components, &assignment),
        method: SplitMethod::Mixture { k },
    })
}
