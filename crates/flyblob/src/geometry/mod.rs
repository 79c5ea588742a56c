//! Geometry kernel: ellipse ⇄ covariance conversions, 2σ pixel masks and
//! bounding boxes.

mod covariance;
mod region;
mod types;

pub use covariance::{covariance_to_ellipse, ellipse_to_covariance};
pub use region::{bounding_box_loose, bounding_box_tight, pixels_inside_ellipse};
pub use types::{BoundingBox, Ellipse};
