//! flyblob — correction of foreground blobs into one ellipse per animal.
//!
//! Input is a per-frame foreground score image (distance from the
//! background model, in standard deviations) and its connected-component
//! labeling. Output is a clean set of ellipses, one per tracked animal.
//! The stages are:
//!
//! 1. **Fit** – weighted-moment ellipse per component ([`fit_all_regions`]).
//! 2. **Small blobs** – re-threshold lower, merge with a neighbor, or delete
//!    ([`SmallBlobRepairer`]).
//! 3. **Large blobs** – discard huge ones, split the rest by raising the
//!    threshold or by Gaussian-mixture clustering ([`LargeBlobRepairer`]).
//!
//! # Public API
//! - [`BlobCorrector`] and [`CorrectionConfig`] as primary entry points
//! - [`Segmentation`] / [`DetectionId`] for driving the repair passes directly
//! - [`MixtureSplitter`] to plug in a different clustering backend
//! - [`RepairStats`] diagnostics returned with every frame

mod config;
mod corrector;
mod error;
pub mod geometry;
mod label;
pub mod mixture;
mod moments;
pub mod repair;
mod segmentation;
mod stats;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{CorrectionConfig, ShapeBounds, ShapeProfile};
pub use corrector::{BlobCorrector, FrameDetections};
pub use error::{ConfigError, FrameError, GeometryError};
pub use geometry::{BoundingBox, Ellipse};
pub use label::{label_box_above, label_mask, threshold_foreground, LabelImage, ScoreImage};
pub use mixture::{EmParams, GaussianComponent, MixtureFit, MixtureSplitter, WeightedEm};
pub use moments::{fit_all_regions, fit_masked_region, fit_weighted_pixels, CoordinateGrids};
pub use repair::{LargeBlobRepairer, SmallBlobRepairer};
pub use segmentation::{DetectionId, DetectionSet, Segmentation};
pub use stats::RepairStats;
