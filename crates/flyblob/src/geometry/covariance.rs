//! Conversions between ellipse parameters and 2×2 covariance matrices.

use nalgebra::Matrix2;

/// Covariance whose eigenvalues are `major²` / `minor²`, with the major
/// eigenvector at `angle` from +x.
pub fn ellipse_to_covariance(major: f64, minor: f64, angle: f64) -> Matrix2<f64> {
    let (s, c) = angle.sin_cos();
    let a2 = major * major;
    let b2 = minor * minor;
    let sxx = c * c * a2 + s * s * b2;
    let syy = s * s * a2 + c * c * b2;
    let sxy = c * s * (a2 - b2);
    Matrix2::new(sxx, sxy, sxy, syy)
}

/// Closed-form eigen-decomposition of `[[sxx, sxy], [sxy, syy]]`.
///
/// Returns `(major, minor, angle)`: square roots of the eigenvalues
/// `(trace ± disc) / 2`, each clamped at zero, and `angle = ½·atan2(2·sxy, sxx − syy)`.
/// When roundoff makes the second root exceed the first, the two lengths are
/// swapped. The result is not floored; see
/// [`Ellipse::with_clamped_axes`](super::Ellipse::with_clamped_axes).
pub fn covariance_to_ellipse(sxx: f64, syy: f64, sxy: f64) -> (f64, f64, f64) {
    let trace = sxx + syy;
    let disc = (4.0 * sxy * sxy + (sxx - syy).powi(2)).max(0.0).sqrt();
    let mut major = ((trace + disc) * 0.5).max(0.0).sqrt();
    let mut minor = ((trace - disc) * 0.5).max(0.0).sqrt();
    if minor > major {
        std::mem::swap(&mut major, &mut minor);
    }
    let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    (major, minor, angle)
}
