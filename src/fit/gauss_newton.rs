//! Regularized Gauss-Newton iteration shared by the single-month and joint
//! optimal-estimation solvers.
//!
//! Each step solves the normal equations of the MAP problem
//!
//! ```text
//! dbeta = (Sa_inv + K^T K)^-1 (K^T (y - F(beta)) - Sa_inv (beta - beta0))
//! ```
//!
//! where `Sa_inv` is the prior precision multiplied by the ridge factor. A
//! failed inversion stops the loop and the last good state is kept.

use nalgebra::{DMatrix, DVector};

use crate::domain::{ConvergenceRule, FitStatus, SECONDS_PER_HOUR};
use crate::logging::FitLogger;
use crate::math::linalg::{LinalgError, invert, nan_matrix};
use crate::models::ForwardEval;

/// Inputs of one Gauss-Newton run.
pub(crate) struct GaussNewton<'a, L: FitLogger> {
    pub y_obs: &'a DVector<f64>,
    pub prior_state: &'a DVector<f64>,
    /// Unscaled prior covariance.
    pub sa: &'a DMatrix<f64>,
    pub ridge: f64,
    pub rule: ConvergenceRule,
    pub max_iterations: usize,
    pub logger: &'a L,
}

/// Everything the solvers need to build their result records.
pub(crate) struct GaussNewtonOutcome {
    pub state: DVector<f64>,
    pub y_hat_prior: DVector<f64>,
    pub y_hat: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub averaging_kernel: DMatrix<f64>,
    pub posterior_cov: DMatrix<f64>,
    pub residual: DVector<f64>,
    pub residual_rms: f64,
    pub n_iter: usize,
    pub j_prior: f64,
    pub j_obs: f64,
    pub statistic: f64,
    pub status: FitStatus,
}

impl<L: FitLogger> GaussNewton<'_, L> {
    pub fn run<F>(&self, forward: F) -> GaussNewtonOutcome
    where
        F: Fn(&DVector<f64>) -> ForwardEval,
    {
        let n_state = self.prior_state.len();
        let beta0 = self.prior_state;
        let prior_eval = forward(beta0);

        let sa_inv_raw = match invert(self.sa, "prior covariance") {
            Ok(m) => m,
            Err(e) => {
                self.logger.warn(&format!("Fitting error occurred before iteration: {e}"));
                return self.finish(
                    beta0.clone(),
                    prior_eval.clone(),
                    prior_eval,
                    None,
                    0,
                    f64::NAN,
                    FitStatus::LinalgFailure {
                        iteration: 0,
                        reason: e.to_string(),
                    },
                );
            }
        };
        let sa_inv = &sa_inv_raw * self.ridge;

        let mut beta = beta0.clone();
        let mut count = 0usize;
        let mut statistic = f64::INFINITY;
        self.log_state(&beta);

        let status = loop {
            let met = match self.rule {
                ConvergenceRule::RelativeStep { tol } => statistic <= tol,
                ConvergenceRule::DsigmaSquare { threshold } => statistic <= threshold * n_state as f64,
            };
            if met {
                break FitStatus::Converged;
            }
            if count >= self.max_iterations {
                break FitStatus::MaxIterations;
            }

            let eval = forward(&beta);
            let k = &eval.jacobian;
            let kt = k.transpose();
            let resid = self.y_obs - &eval.y;
            let deviation = &beta - beta0;
            let normal = &sa_inv + &kt * k;

            let dbeta = match invert(&normal, "normal-equation").and_then(|inv| {
                let step = inv * (&kt * &resid - &sa_inv * &deviation);
                if step.iter().all(|v| v.is_finite()) {
                    Ok(step)
                } else {
                    Err(LinalgError::NonFinite("state increment"))
                }
            }) {
                Ok(step) => step,
                Err(e) => {
                    self.logger
                        .warn(&format!("Fitting error occurred at iteration {count}: {e}"));
                    break FitStatus::LinalgFailure {
                        iteration: count,
                        reason: e.to_string(),
                    };
                }
            };

            statistic = match self.rule {
                ConvergenceRule::RelativeStep { .. } => dbeta.component_div(beta0).norm(),
                ConvergenceRule::DsigmaSquare { .. } => {
                    dbeta.dot(&(&kt * &resid / self.ridge + &sa_inv * &deviation))
                }
            };
            beta += dbeta;
            count += 1;

            self.logger.info(&format!("step {count}"));
            match self.rule {
                ConvergenceRule::RelativeStep { .. } => {
                    self.logger.info(&format!("relative increment: {statistic:.3e}"))
                }
                ConvergenceRule::DsigmaSquare { .. } => {
                    self.logger.info(&format!("dsigma square={statistic:.1}"))
                }
            }
            self.log_state(&beta);
            if count == self.max_iterations {
                self.logger.warn("max iteration number reached!");
            }
        };

        let eval = forward(&beta);
        self.finish(beta, prior_eval, eval, Some((&sa_inv_raw, &sa_inv)), count, statistic, status)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        state: DVector<f64>,
        prior_eval: ForwardEval,
        eval: ForwardEval,
        precision: Option<(&DMatrix<f64>, &DMatrix<f64>)>,
        n_iter: usize,
        statistic: f64,
        mut status: FitStatus,
    ) -> GaussNewtonOutcome {
        let n_state = state.len();
        let residual = self.y_obs - &eval.y;
        let j_obs = residual.dot(&residual);
        let residual_rms = (j_obs / residual.len() as f64).sqrt();

        let (averaging_kernel, posterior_cov, j_prior) = match precision {
            Some((sa_inv_raw, sa_inv)) => {
                let deviation = &state - self.prior_state;
                let j_prior = deviation.dot(&(sa_inv_raw * &deviation));
                let ktk = eval.jacobian.transpose() * &eval.jacobian;
                match invert(&(&ktk + sa_inv), "posterior") {
                    Ok(m) => (&m * &ktk, m * self.ridge, j_prior),
                    Err(e) => {
                        self.logger.warn(&format!("Posterior diagnostics failed: {e}"));
                        if !matches!(status, FitStatus::LinalgFailure { .. }) {
                            status = FitStatus::PosteriorFailure {
                                reason: e.to_string(),
                            };
                        }
                        (nan_matrix(n_state, n_state), nan_matrix(n_state, n_state), j_prior)
                    }
                }
            }
            None => (nan_matrix(n_state, n_state), nan_matrix(n_state, n_state), f64::NAN),
        };

        GaussNewtonOutcome {
            state,
            y_hat_prior: prior_eval.y,
            y_hat: eval.y,
            jacobian: eval.jacobian,
            averaging_kernel,
            posterior_cov,
            residual,
            residual_rms,
            n_iter,
            j_prior,
            j_obs,
            statistic,
            status,
        }
    }

    /// Mean Q and mean tau (hours) across the state's month blocks.
    fn log_state(&self, beta: &DVector<f64>) {
        let m = beta.len() / 2;
        let q = beta.rows(0, m).mean();
        let tau = beta.rows(m, m).mean() / SECONDS_PER_HOUR;
        self.logger.info(&format!("Q = {q:.1}, tau = {tau:.1}"));
    }
}
