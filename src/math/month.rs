//! Inter-month prior correlation.
//!
//! Prior errors of neighbouring months are correlated with an exponential decay
//! in calendar distance. The distance wraps around the year, so December and
//! January are one month apart and the largest distance is 6.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::ObservationError;

/// Circular distance between two calendar months (0..=6).
pub fn month_distance(m1: u32, m2: u32) -> u32 {
    let d = m1.abs_diff(m2) % 12;
    d.min(12 - d)
}

/// `exp(-distance(m1, m2) / dm)`.
pub fn month_correlation(m1: u32, m2: u32, dm: f64) -> f64 {
    (-(month_distance(m1, m2) as f64) / dm).exp()
}

/// Prior uncertainty of one month in a joint fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthPrior {
    /// Calendar month, 1-12.
    pub month: u32,
    pub sd_q: f64,
    pub sd_tau: f64,
}

/// Assemble the `2m x 2m` prior covariance of `(Q_1..Q_m, tau_1..tau_m)`.
///
/// `C_Q[i,j] = sd_Q_i sd_Q_j corr(m_i, m_j)`, likewise for tau, and the
/// Q/tau cross block is `rho * sd_Q_i sd_tau_j corr(m_i, m_j)`.
pub fn build_multi_month_prior(
    months: &[MonthPrior],
    dm: f64,
    rho: f64,
) -> Result<DMatrix<f64>, ObservationError> {
    if !(dm.is_finite() && dm > 0.0) {
        return Err(ObservationError::InvalidPrior(format!(
            "month decay scale must be finite and > 0, got {dm}"
        )));
    }
    if !(rho > -1.0 && rho < 1.0) {
        return Err(ObservationError::InvalidPrior(format!(
            "Q/tau correlation must lie in (-1, 1), got {rho}"
        )));
    }
    if let Some(p) = months
        .iter()
        .find(|p| !(p.sd_q.is_finite() && p.sd_tau.is_finite() && p.sd_q > 0.0 && p.sd_tau > 0.0))
    {
        return Err(ObservationError::InvalidPrior(format!(
            "prior standard deviations of month {} must be finite and > 0",
            p.month
        )));
    }

    let m = months.len();
    let mut sa = DMatrix::zeros(2 * m, 2 * m);
    for (i, a) in months.iter().enumerate() {
        for (j, b) in months.iter().enumerate() {
            let corr = month_correlation(a.month, b.month, dm);
            sa[(i, j)] = a.sd_q * b.sd_q * corr;
            sa[(m + i, m + j)] = a.sd_tau * b.sd_tau * corr;
            sa[(i, m + j)] = rho * a.sd_q * b.sd_tau * corr;
            sa[(m + i, j)] = rho * a.sd_tau * b.sd_q * corr;
        }
    }
    Ok(sa)
}
