//! Joint optimal estimation over several months.
//!
//! Every month keeps its own `(Q_i, tau_i)`; months are tied together only
//! through the prior covariance supplied by the caller (see
//! `math::month::build_multi_month_prior`). Samples of all months are pooled
//! into one observation vector and month boundaries are tracked with
//! `MonthRanges`.

use nalgebra::{DMatrix, DVector};

use crate::domain::{MonthRanges, MonthlyObservation, MultiMonthConfig, MultiMonthFit};
use crate::error::ObservationError;
use crate::fit::gauss_newton::GaussNewton;
use crate::fit::mask::mask_samples;
use crate::logging::{FitLogger, LogFacade};
use crate::math::linalg::{correlation, is_symmetric};
use crate::models::{PooledInput, forward_multi};

/// Prior state and covariance of a joint fit.
#[derive(Debug, Clone)]
pub struct JointPrior {
    pub q: Vec<f64>,
    pub tau: Vec<f64>,
    /// `2m x 2m` covariance ordered `(Q_1..Q_m, tau_1..tau_m)`.
    pub covariance: DMatrix<f64>,
}

/// Multi-month joint optimal-estimation solver.
#[derive(Debug, Clone)]
pub struct JointEstimator<L: FitLogger = LogFacade> {
    config: MultiMonthConfig,
    logger: L,
}

impl<L: FitLogger> JointEstimator<L> {
    pub fn new(config: MultiMonthConfig, logger: L) -> Result<Self, ObservationError> {
        config.validate()?;
        Ok(Self { config, logger })
    }

    pub fn config(&self) -> &MultiMonthConfig {
        &self.config
    }

    pub fn fit(
        &self,
        months: &[MonthlyObservation],
        prior: &JointPrior,
    ) -> Result<MultiMonthFit, ObservationError> {
        let m = months.len();
        validate_prior(m, prior)?;

        let mut ws = Vec::new();
        let mut c = Vec::new();
        let mut shape = Vec::new();
        let mut counts = Vec::with_capacity(m);
        let mut length_scales = Vec::with_capacity(m);
        for obs in months {
            let s = mask_samples(obs, &self.config.ws_range);
            if s.is_empty() {
                self.logger.warn(&format!(
                    "{}: empty month, constrained by the prior only",
                    obs.month().format("%Y-%m")
                ));
            }
            counts.push(s.len());
            length_scales.push(s.length_scale);
            ws.extend_from_slice(&s.ws);
            c.extend_from_slice(&s.c);
            shape.extend_from_slice(&s.shape);
        }
        let ranges = MonthRanges::from_counts(&counts);
        if ranges.total() != ws.len() {
            return Err(ObservationError::RangeCoverage {
                covered: ranges.total(),
                total: ws.len(),
            });
        }

        let pooled = PooledInput {
            ws: &ws,
            shape: &shape,
            length_scales: &length_scales,
            ranges: &ranges,
        };
        let y_obs = DVector::from_column_slice(&c);
        let prior_state = DVector::from_iterator(2 * m, prior.q.iter().chain(&prior.tau).copied());

        let out = GaussNewton {
            y_obs: &y_obs,
            prior_state: &prior_state,
            sa: &prior.covariance,
            ridge: self.config.ridge,
            rule: self.config.convergence_rule(),
            max_iterations: self.config.max_iterations,
            logger: &self.logger,
        }
        .run(|beta| forward_multi(&pooled, &beta.as_slice()[..m], &beta.as_slice()[m..]));

        let r_hat_per_month = (0..m)
            .map(|i| correlation(&out.posterior_cov, i, m + i))
            .collect();

        Ok(MultiMonthFit {
            months: months.iter().map(MonthlyObservation::month).collect(),
            q: out.state.as_slice()[..m].to_vec(),
            tau: out.state.as_slice()[m..].to_vec(),
            r_hat: correlation(&out.posterior_cov, 0, m),
            r_hat_per_month,
            state: out.state,
            prior_state,
            ranges,
            ws,
            c,
            y_hat_prior: out.y_hat_prior,
            y_hat: out.y_hat,
            jacobian: out.jacobian,
            averaging_kernel: out.averaging_kernel,
            posterior_cov: out.posterior_cov,
            residual: out.residual,
            residual_rms: out.residual_rms,
            n_iter: out.n_iter,
            j_prior: out.j_prior,
            j_obs: out.j_obs,
            convergence_statistic: out.statistic,
            status: out.status,
        })
    }
}

fn validate_prior(m: usize, prior: &JointPrior) -> Result<(), ObservationError> {
    if m == 0 {
        return Err(ObservationError::InvalidConfig(
            "a joint fit needs at least one month".to_string(),
        ));
    }
    if prior.q.len() != m || prior.tau.len() != m {
        return Err(ObservationError::InvalidPrior(format!(
            "expected {m} prior Q and tau values, got {} and {}",
            prior.q.len(),
            prior.tau.len()
        )));
    }
    if prior.q.iter().chain(&prior.tau).any(|v| !v.is_finite() || *v == 0.0) {
        return Err(ObservationError::InvalidPrior(
            "prior Q and tau must be finite and non-zero".to_string(),
        ));
    }
    let cov = &prior.covariance;
    if cov.shape() != (2 * m, 2 * m) {
        return Err(ObservationError::InvalidPrior(format!(
            "prior covariance is {}x{}, expected {n}x{n}",
            cov.nrows(),
            cov.ncols(),
            n = 2 * m
        )));
    }
    if cov.iter().any(|v| !v.is_finite()) || !is_symmetric(cov) {
        return Err(ObservationError::InvalidPrior(
            "prior covariance must be finite and symmetric".to_string(),
        ));
    }
    Ok(())
}
