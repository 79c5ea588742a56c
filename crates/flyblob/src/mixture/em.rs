//! Weighted EM with k-means++ seeding.

use nalgebra::{DMatrix, Matrix2, Vector2};
use rand::prelude::*;

use super::{EmParams, GaussianComponent, MixtureFit, MixtureSplitter};
use crate::geometry::{covariance_to_ellipse, ellipse_to_covariance};

/// Responsibility mass below which a component is treated as empty.
const EMPTY_MASS: f64 = 1e-12;

/// Default [`MixtureSplitter`]: weighted k-means++ / Lloyd initialization,
/// then weighted EM until the negative log-likelihood settles.
///
/// Deterministic for a fixed [`EmParams::seed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedEm;

impl MixtureSplitter for WeightedEm {
    fn cluster(
        &self,
        points: &[[f64; 2]],
        weights: &[f64],
        k: usize,
        params: &EmParams,
    ) -> Option<MixtureFit> {
        debug_assert_eq!(points.len(), weights.len());
        if k == 0 || points.len() < k {
            return None;
        }
        let weights = effective_weights(weights);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let centers = kmeans(points, &weights, k, params, &mut rng);
        let mut components = components_from_centers(points, &weights, &centers, params.min_cov);

        let mut prev_nll = f64::INFINITY;
        for iter in 0..params.max_iters {
            let (resp, evidence) = self.responsibilities(&components, points);
            let nll = neg_log_likelihood(&evidence, &weights);
            if (prev_nll - nll).abs() < params.em_thresh {
                tracing::trace!(k, iter, nll, "EM converged");
                break;
            }
            prev_nll = nll;
            self.reestimate(&mut components, &resp, points, &weights, params.min_cov);
        }

        let (responsibilities, evidence) = self.responsibilities(&components, points);
        let neg_log_likelihood = neg_log_likelihood(&evidence, &weights);
        Some(MixtureFit {
            components,
            responsibilities,
            neg_log_likelihood,
        })
    }

    fn responsibilities(
        &self,
        components: &[GaussianComponent],
        points: &[[f64; 2]],
    ) -> (DMatrix<f64>, Vec<f64>) {
        let k = components.len();
        let mut resp = DMatrix::zeros(points.len(), k);
        let mut evidence = Vec::with_capacity(points.len());
        if k == 0 {
            evidence.resize(points.len(), f64::NEG_INFINITY);
            return (resp, evidence);
        }

        let inverses: Vec<Option<(Matrix2<f64>, f64)>> = components
            .iter()
            .map(|c| {
                let det = c.covariance.determinant();
                if !(det > 0.0) || !det.is_finite() {
                    return None;
                }
                c.covariance.try_inverse().map(|inv| (inv, det))
            })
            .collect();

        let mut log_terms = vec![0.0; k];
        for (n, p) in points.iter().enumerate() {
            let x = Vector2::new(p[0], p[1]);
            for (j, (c, inv)) in components.iter().zip(&inverses).enumerate() {
                log_terms[j] = match inv {
                    Some((inv, det)) if c.prior > 0.0 => {
                        c.prior.ln() + log_gaussian(&x, &c.mean, inv, *det)
                    }
                    _ => f64::NEG_INFINITY,
                };
            }
            let max = log_terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max == f64::NEG_INFINITY {
                for j in 0..k {
                    resp[(n, j)] = 1.0 / k as f64;
                }
                evidence.push(f64::NEG_INFINITY);
                continue;
            }
            let sum: f64 = log_terms.iter().map(|l| (l - max).exp()).sum();
            for j in 0..k {
                resp[(n, j)] = (log_terms[j] - max).exp() / sum;
            }
            evidence.push(max + sum.ln());
        }
        (resp, evidence)
    }

    fn reestimate(
        &self,
        components: &mut [GaussianComponent],
        responsibilities: &DMatrix<f64>,
        points: &[[f64; 2]],
        weights: &[f64],
        min_cov: f64,
    ) {
        debug_assert_eq!(responsibilities.ncols(), components.len());
        debug_assert_eq!(responsibilities.nrows(), points.len());

        let mut masses = vec![0.0; components.len()];
        for (j, c) in components.iter_mut().enumerate() {
            let mut mass = 0.0;
            let mut mean = Vector2::<f64>::zeros();
            for (n, p) in points.iter().enumerate() {
                let w = weights[n] * responsibilities[(n, j)];
                mass += w;
                mean += w * Vector2::new(p[0], p[1]);
            }
            masses[j] = mass;
            if mass <= EMPTY_MASS {
                continue;
            }
            mean /= mass;

            let mut cov = Matrix2::<f64>::zeros();
            for (n, p) in points.iter().enumerate() {
                let w = weights[n] * responsibilities[(n, j)];
                let d = Vector2::new(p[0], p[1]) - mean;
                cov += w * d * d.transpose();
            }
            c.mean = mean;
            c.covariance = floor_covariance(&(cov / mass), min_cov);
        }

        let total: f64 = masses.iter().sum();
        for (c, &mass) in components.iter_mut().zip(&masses) {
            c.prior = if mass > EMPTY_MASS && total > 0.0 {
                mass / total
            } else {
                0.0
            };
        }
    }
}

fn effective_weights(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter().map(|w| w.max(0.0)).collect()
    } else {
        vec![1.0; weights.len()]
    }
}

fn neg_log_likelihood(evidence: &[f64], weights: &[f64]) -> f64 {
    -evidence.iter().zip(weights).map(|(e, w)| w * e).sum::<f64>()
}

fn log_gaussian(x: &Vector2<f64>, mean: &Vector2<f64>, inv: &Matrix2<f64>, det: f64) -> f64 {
    let d = x - mean;
    let q = (d.transpose() * inv * d)[(0, 0)];
    -(2.0 * std::f64::consts::PI).ln() - 0.5 * det.ln() - 0.5 * q
}

/// Raise both covariance eigenvalues to at least `min_cov`.
fn floor_covariance(cov: &Matrix2<f64>, min_cov: f64) -> Matrix2<f64> {
    let (major, minor, angle) = covariance_to_ellipse(cov[(0, 0)], cov[(1, 1)], cov[(0, 1)]);
    let floor = min_cov.max(0.0).sqrt();
    ellipse_to_covariance(major.max(floor), minor.max(floor), angle)
}

fn sq_dist(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

/// Draw an index with probability proportional to `mass`.
fn sample_by_mass(rng: &mut impl Rng, mass: &[f64]) -> usize {
    let total: f64 = mass.iter().sum();
    if !(total > 0.0) {
        return rng.gen_range(0..mass.len());
    }
    let mut u = rng.gen::<f64>() * total;
    for (i, &m) in mass.iter().enumerate() {
        if u < m {
            return i;
        }
        u -= m;
    }
    // Rounding can leave u marginally above the last bin.
    mass.iter().rposition(|&m| m > 0.0).unwrap_or(0)
}

fn nearest(point: &[f64; 2], centers: &[[f64; 2]]) -> usize {
    let mut best = (0, f64::INFINITY);
    for (j, c) in centers.iter().enumerate() {
        let d = sq_dist(point, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best.0
}

/// Weighted k-means++ seeding followed by Lloyd iterations.
fn kmeans(
    points: &[[f64; 2]],
    weights: &[f64],
    k: usize,
    params: &EmParams,
    rng: &mut impl Rng,
) -> Vec<[f64; 2]> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[sample_by_mass(rng, weights)]);
    let mut d2: Vec<f64> = points.iter().map(|p| sq_dist(p, &centers[0])).collect();
    while centers.len() < k {
        let mass: Vec<f64> = d2.iter().zip(weights).map(|(d, w)| d * w).collect();
        let next = points[sample_by_mass(rng, &mass)];
        for (d, p) in d2.iter_mut().zip(points) {
            *d = d.min(sq_dist(p, &next));
        }
        centers.push(next);
    }

    for _ in 0..params.max_iters {
        let mut sums = vec![[0.0f64; 3]; k];
        for (p, &w) in points.iter().zip(weights) {
            let j = nearest(p, &centers);
            sums[j][0] += w;
            sums[j][1] += w * p[0];
            sums[j][2] += w * p[1];
        }
        let mut shift = 0.0f64;
        for (c, s) in centers.iter_mut().zip(&sums) {
            if s[0] <= 0.0 {
                continue;
            }
            let moved = [s[1] / s[0], s[2] / s[0]];
            shift = shift.max(sq_dist(c, &moved).sqrt());
            *c = moved;
        }
        if shift < params.kmeans_thresh {
            break;
        }
    }
    centers
}

/// Initial components from hard k-means clusters.
fn components_from_centers(
    points: &[[f64; 2]],
    weights: &[f64],
    centers: &[[f64; 2]],
    min_cov: f64,
) -> Vec<GaussianComponent> {
    let k = centers.len();
    let mut mass = vec![0.0; k];
    let mut scatter = vec![Matrix2::<f64>::zeros(); k];
    for (p, &w) in points.iter().zip(weights) {
        let j = nearest(p, centers);
        let d = Vector2::new(p[0] - centers[j][0], p[1] - centers[j][1]);
        mass[j] += w;
        scatter[j] += w * d * d.transpose();
    }
    let total: f64 = mass.iter().sum();
    centers
        .iter()
        .zip(mass.iter().zip(&scatter))
        .map(|(c, (&m, s))| {
            let covariance = if m > EMPTY_MASS {
                floor_covariance(&(*s / m), min_cov)
            } else {
                Matrix2::identity() * min_cov.max(EMPTY_MASS)
            };
            GaussianComponent {
                mean: Vector2::new(c[0], c[1]),
                covariance,
                prior: if total > 0.0 { m / total } else { 0.0 },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixture::hard_assignments;
    use crate::test_utils::disk_pixels;
    use approx::assert_relative_eq;

    fn two_disks() -> Vec<[f64; 2]> {
        disk_pixels(20.0, 20.0, 6.0)
            .into_iter()
            .chain(disk_pixels(50.0, 22.0, 6.0))
            .map(|(x, y)| [x as f64, y as f64])
            .collect()
    }

    #[test]
    fn separates_two_disks() {
        let points = two_disks();
        let weights = vec![1.0; points.len()];
        let fit = WeightedEm
            .cluster(&points, &weights, 2, &EmParams::default())
            .expect("enough points");
        assert_eq!(fit.components.len(), 2);
        assert_eq!(fit.responsibilities.shape(), (points.len(), 2));

        let mut xs: Vec<f64> = fit.components.iter().map(|c| c.mean.x).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        assert_relative_eq!(xs[0], 20.0, epsilon = 0.5);
        assert_relative_eq!(xs[1], 50.0, epsilon = 0.5);
        for c in &fit.components {
            assert_relative_eq!(c.prior, 0.5, epsilon = 0.05);
        }

        let labels = hard_assignments(&fit.responsibilities);
        let left = labels[0];
        for (p, l) in points.iter().zip(&labels) {
            assert_eq!(*l == left, p[0] < 35.0);
        }
    }

    #[test]
    fn same_seed_same_fit() {
        let points = two_disks();
        let weights: Vec<f64> = points.iter().map(|p| 1.0 + p[1] * 0.1).collect();
        let params = EmParams::default();
        let a = WeightedEm.cluster(&points, &weights, 3, &params).expect("fit");
        let b = WeightedEm.cluster(&points, &weights, 3, &params).expect("fit");
        assert_eq!(a.components, b.components);
        assert_eq!(a.neg_log_likelihood, b.neg_log_likelihood);
    }

    #[test]
    fn rejects_too_many_components() {
        let points = [[0.0, 0.0], [1.0, 0.0]];
        assert!(WeightedEm
            .cluster(&points, &[1.0, 1.0], 3, &EmParams::default())
            .is_none());
        assert!(WeightedEm
            .cluster(&points, &[1.0, 1.0], 0, &EmParams::default())
            .is_none());
    }

    #[test]
    fn responsibilities_are_normalized() {
        let points = two_disks();
        let weights = vec![1.0; points.len()];
        let fit = WeightedEm
            .cluster(&points, &weights, 2, &EmParams::default())
            .expect("fit");
        let (resp, evidence) = WeightedEm.responsibilities(&fit.components, &points);
        assert_eq!(evidence.len(), points.len());
        for row in resp.row_iter() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
        assert!(evidence.iter().all(|e| e.is_finite()));
    }

    #[test]
    fn reestimate_respects_covariance_floor() {
        // Points on a horizontal line have zero vertical variance.
        let points: Vec<[f64; 2]> = (0..10).map(|x| [x as f64, 5.0]).collect();
        let weights = vec![1.0; points.len()];
        let resp = DMatrix::from_element(points.len(), 1, 1.0);
        let mut comps = [GaussianComponent {
            mean: Vector2::zeros(),
            covariance: Matrix2::identity(),
            prior: 1.0,
        }];
        WeightedEm.reestimate(&mut comps, &resp, &points, &weights, 0.25);
        assert_relative_eq!(comps[0].mean.x, 4.5, epsilon = 1e-12);
        assert_relative_eq!(comps[0].mean.y, 5.0, epsilon = 1e-12);
        assert_relative_eq!(comps[0].covariance[(1, 1)], 0.25, epsilon = 1e-9);
        assert_relative_eq!(comps[0].covariance[(0, 0)], 8.25, epsilon = 1e-9);
        assert_relative_eq!(comps[0].prior, 1.0);
    }

    #[test]
    fn unused_component_gets_zero_prior() {
        let points = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let weights = [1.0; 3];
        let resp = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        let mut comps = [
            GaussianComponent {
                mean: Vector2::zeros(),
                covariance: Matrix2::identity(),
                prior: 0.5,
            },
            GaussianComponent {
                mean: Vector2::new(9.0, 9.0),
                covariance: Matrix2::identity(),
                prior: 0.5,
            },
        ];
        WeightedEm.reestimate(&mut comps, &resp, &points, &weights, 0.25);
        assert_relative_eq!(comps[0].prior, 1.0);
        assert_eq!(comps[1].prior, 0.0);
        assert_eq!(comps[1].mean, Vector2::new(9.0, 9.0));
    }
}
