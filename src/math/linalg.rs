//! Small dense linear-algebra helpers.
//!
//! The inversions here involve tiny matrices (2x2 for one month, 2m x 2m for a
//! joint fit) whose entries span many orders of magnitude (Q in mol/s, tau in
//! seconds). Every result is checked for finiteness so that a numerically
//! meaningless inverse is reported as a failure instead of leaking NaN/inf
//! into the next Gauss-Newton step.

use nalgebra::{DMatrix, DVector};

/// Failure of a dense linear solve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinalgError {
    #[error("{0} matrix is singular")]
    Singular(&'static str),

    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
}

/// Invert a square matrix, rejecting singular or non-finite results.
pub fn invert(m: &DMatrix<f64>, what: &'static str) -> Result<DMatrix<f64>, LinalgError> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite(what));
    }
    let inv = m.clone().try_inverse().ok_or(LinalgError::Singular(what))?;
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite(what));
    }
    Ok(inv)
}

/// Solve the symmetric system `a x = b`.
///
/// Cholesky is tried first. If the matrix is not numerically positive definite
/// we fall back to SVD with progressively looser tolerances.
pub fn solve_symmetric(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    what: &'static str,
) -> Result<DVector<f64>, LinalgError> {
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite(what));
    }
    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Ok(x);
        }
    }

    let svd = a.clone().svd(true, true);
    let scale = svd.singular_values.max();
    for &tol in &[1e-14, 1e-12, 1e-10] {
        if let Ok(x) = svd.solve(b, tol * scale) {
            if x.iter().all(|v| v.is_finite()) {
                return Ok(x);
            }
        }
    }
    Err(LinalgError::Singular(what))
}

/// 2x2 prior covariance of `(Q, tau)` from standard deviations and a correlation.
pub fn prior_covariance(sd_q: f64, sd_tau: f64, rho: f64) -> DMatrix<f64> {
    let cross = rho * sd_q * sd_tau;
    DMatrix::from_row_slice(2, 2, &[sd_q * sd_q, cross, cross, sd_tau * sd_tau])
}

/// Symmetry check with a tolerance relative to the largest entry.
pub fn is_symmetric(m: &DMatrix<f64>) -> bool {
    if !m.is_square() {
        return false;
    }
    let scale = m.amax().max(f64::MIN_POSITIVE);
    let n = m.nrows();
    (0..n).all(|i| (i + 1..n).all(|j| (m[(i, j)] - m[(j, i)]).abs() <= 1e-12 * scale))
}

/// `r_ij / sqrt(r_ii r_jj)`.
pub fn correlation(cov: &DMatrix<f64>, i: usize, j: usize) -> f64 {
    cov[(i, j)] / cov[(i, i)].sqrt() / cov[(j, j)].sqrt()
}

pub fn nan_matrix(rows: usize, cols: usize) -> DMatrix<f64> {
    DMatrix::from_element(rows, cols, f64::NAN)
}

pub fn nan_vector(n: usize) -> DVector<f64> {
    DVector::from_element(n, f64::NAN)
}
