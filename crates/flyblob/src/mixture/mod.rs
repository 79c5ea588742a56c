//! Weighted Gaussian-mixture clustering used to split merged blobs.
//!
//! The large-blob repair depends only on the [`MixtureSplitter`] trait;
//! [`WeightedEm`] (k-means++ seeding followed by weighted EM) is the default
//! implementation.

mod em;

use nalgebra::{DMatrix, Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::geometry::Ellipse;

pub use em::WeightedEm;

/// Convergence and conditioning parameters for [`MixtureSplitter::cluster`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmParams {
    /// k-means stops when no center moves more than this (pixels).
    pub kmeans_thresh: f64,
    /// EM stops when the weighted negative log-likelihood changes by less than this.
    pub em_thresh: f64,
    /// Floor on covariance eigenvalues (pixels²).
    pub min_cov: f64,
    /// Iteration cap for each of the k-means and EM loops.
    pub max_iters: usize,
    /// Seed for k-means++ initialization.
    pub seed: u64,
}

impl Default for EmParams {
    fn default() -> Self {
        Self {
            kmeans_thresh: 0.1,
            em_thresh: 0.1,
            min_cov: 0.25,
            max_iters: 100,
            seed: 42,
        }
    }
}

/// One mixture component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianComponent {
    /// Mean `(x, y)`.
    pub mean: Vector2<f64>,
    /// 2×2 covariance.
    pub covariance: Matrix2<f64>,
    /// Mixing weight.
    pub prior: f64,
}

impl GaussianComponent {
    /// Component centered on `ellipse` with its moment covariance.
    pub fn from_ellipse(ellipse: &Ellipse, prior: f64) -> Self {
        Self {
            mean: Vector2::new(ellipse.cx, ellipse.cy),
            covariance: ellipse.covariance(),
            prior,
        }
    }

    /// Ellipse with this component's mean and covariance.
    pub fn to_ellipse(&self) -> Ellipse {
        Ellipse::from_covariance(self.mean.x, self.mean.y, &self.covariance)
    }
}

/// Result of fitting a k-component mixture.
#[derive(Debug, Clone)]
pub struct MixtureFit {
    /// Fitted components.
    pub components: Vec<GaussianComponent>,
    /// Soft assignment, `N × k`.
    pub responsibilities: DMatrix<f64>,
    /// Weighted negative log-likelihood of the points under the fit.
    pub neg_log_likelihood: f64,
}

/// Gaussian-mixture capability required by the large-blob repair.
pub trait MixtureSplitter {
    /// Fit a fresh `k`-component weighted mixture to `points`.
    ///
    /// Returns `None` when `k` is zero or exceeds the number of points.
    fn cluster(
        &self,
        points: &[[f64; 2]],
        weights: &[f64],
        k: usize,
        params: &EmParams,
    ) -> Option<MixtureFit>;

    /// Soft assignment of `points` to fixed `components` (E-step).
    ///
    /// Returns the `N × k` responsibilities and each point's log-evidence.
    fn responsibilities(
        &self,
        components: &[GaussianComponent],
        points: &[[f64; 2]],
    ) -> (DMatrix<f64>, Vec<f64>);

    /// Re-estimate `components` in place from fixed responsibilities (M-step).
    fn reestimate(
        &self,
        components: &mut [GaussianComponent],
        responsibilities: &DMatrix<f64>,
        points: &[[f64; 2]],
        weights: &[f64],
        min_cov: f64,
    );
}

/// Index of the most responsible component for every point.
pub fn hard_assignments(responsibilities: &DMatrix<f64>) -> Vec<usize> {
    responsibilities
        .row_iter()
        .map(|row| {
            let mut best = (0, f64::NEG_INFINITY);
            for (k, &r) in row.iter().enumerate() {
                if r > best.1 {
                    best = (k, r);
                }
            }
            best.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hard_assignment_picks_row_maximum() {
        let r = DMatrix::from_row_slice(3, 2, &[0.9, 0.1, 0.2, 0.8, 0.5, 0.5]);
        assert_eq!(hard_assignments(&r), vec![0, 1, 0]);
    }

    #[test]
    fn component_ellipse_roundtrip() {
        let e = Ellipse::new(3.0, 4.0, 5.0, 2.0, 0.3);
        let c = GaussianComponent::from_ellipse(&e, 0.5);
        let back = c.to_ellipse();
        assert_relative_eq!(back.major, 5.0, epsilon = 1e-10);
        assert_relative_eq!(back.minor, 2.0, epsilon = 1e-10);
        assert_relative_eq!(back.cx, 3.0);
        assert_relative_eq!(c.prior, 0.5);
    }
}
