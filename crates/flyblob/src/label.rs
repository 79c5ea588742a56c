//! Connected-component labeling and foreground thresholding.
//!
//! All labeling uses 4-connectivity.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::geometry::BoundingBox;

/// Per-pixel owner labels; 0 is background.
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Per-pixel foreground score (distance from the background model in
/// standard deviations).
pub type ScoreImage = ImageBuffer<Luma<f32>, Vec<f32>>;

const FOREGROUND: u8 = 255;

/// Label the connected components of a boolean mask given row-major over a
/// `width × height` raster. Returns the label raster and the component count.
pub fn label_mask(mask: &[bool], width: u32, height: u32) -> (LabelImage, u32) {
    debug_assert_eq!(mask.len(), width as usize * height as usize);
    let raster = GrayImage::from_fn(width, height, |x, y| {
        let on = mask[y as usize * width as usize + x as usize];
        Luma([if on { FOREGROUND } else { 0 }])
    });
    let labels = connected_components(&raster, Connectivity::Four, Luma([0u8]));
    let count = labels.as_raw().iter().copied().max().unwrap_or(0);
    (labels, count)
}

/// Relabel the pixels of `bbox` whose score is at least `threshold`, plus
/// any pixel for which `include(x, y)` holds.
///
/// Labels are local to the box; the returned raster is `bbox.width() × bbox.height()`.
pub fn label_box_above(
    scores: &ScoreImage,
    bbox: &BoundingBox,
    threshold: f64,
    include: impl Fn(u32, u32) -> bool,
) -> (LabelImage, u32) {
    let mask: Vec<bool> = bbox
        .pixels()
        .map(|(x, y)| scores.get_pixel(x, y)[0] as f64 >= threshold || include(x, y))
        .collect();
    label_mask(&mask, bbox.width(), bbox.height())
}

/// Hysteresis foreground segmentation.
///
/// Pixels scoring at least `low` are candidates; a connected candidate
/// region is kept only if some pixel in it scores at least `high`.
/// Returns the labeled foreground with contiguous labels and its component count.
pub fn threshold_foreground(scores: &ScoreImage, low: f64, high: f64) -> (LabelImage, u32) {
    let (width, height) = scores.dimensions();
    let candidates: Vec<bool> = scores.pixels().map(|p| p[0] as f64 >= low).collect();
    let (labels, count) = label_mask(&candidates, width, height);

    let mut has_seed = vec![false; count as usize + 1];
    for (label, score) in labels.pixels().zip(scores.pixels()) {
        if label[0] > 0 && score[0] as f64 >= high {
            has_seed[label[0] as usize] = true;
        }
    }

    let mut remap = vec![0u32; count as usize + 1];
    let mut kept = 0u32;
    for label in 1..=count as usize {
        if has_seed[label] {
            kept += 1;
            remap[label] = kept;
        }
    }

    let mut out = labels;
    for p in out.pixels_mut() {
        p[0] = remap[p[0] as usize];
    }
    (out, kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_connectivity_separates_diagonal_pixels() {
        #[rustfmt::skip]
        let mask = [
            true, false, false,
            false, true, false,
            false, false, true,
        ];
        let (_, count) = label_mask(&mask, 3, 3);
        assert_eq!(count, 3);
    }

    #[test]
    fn box_labels_are_local() {
        let mut scores = ScoreImage::new(10, 6);
        for x in 2..4 {
            scores.put_pixel(x, 2, Luma([5.0]));
        }
        for x in 6..8 {
            scores.put_pixel(x, 2, Luma([5.0]));
        }
        let bbox = BoundingBox {
            row_min: 1,
            row_max: 4,
            col_min: 1,
            col_max: 9,
        };
        let (labels, count) = label_box_above(&scores, &bbox, 1.0, |_, _| false);
        assert_eq!(count, 2);
        assert_eq!(labels.dimensions(), (8, 3));
        assert_ne!(labels.get_pixel(1, 1)[0], 0);
        assert_ne!(labels.get_pixel(1, 1)[0], labels.get_pixel(5, 1)[0]);

        // Forcing the gap in merges the two runs.
        let (_, merged) =
            label_box_above(&scores, &bbox, 1.0, |x, y| y == 2 && (4..6).contains(&x));
        assert_eq!(merged, 1);
    }

    #[test]
    fn hysteresis_drops_regions_without_a_strong_pixel() {
        let mut scores = ScoreImage::new(12, 5);
        // weak-only region
        for x in 0..3 {
            scores.put_pixel(x, 1, Luma([2.0]));
        }
        // weak region with one strong pixel
        for x in 6..10 {
            scores.put_pixel(x, 3, Luma([2.0]));
        }
        scores.put_pixel(8, 3, Luma([12.0]));

        let (labels, count) = threshold_foreground(&scores, 1.5, 10.0);
        assert_eq!(count, 1);
        assert_eq!(labels.get_pixel(1, 1)[0], 0);
        for x in 6..10 {
            assert_eq!(labels.get_pixel(x, 3)[0], 1);
        }
    }
}
