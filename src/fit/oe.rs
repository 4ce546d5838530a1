//! Single-month optimal estimation of `(Q, tau)`.
//!
//! Gauss-Newton with a Bayesian prior centred on the initial guess. The 2x2
//! prior covariance is built from the prior standard deviations and the
//! prior Q/tau correlation; the ridge factor scales its precision against the
//! (unit-variance) observation term.

use nalgebra::DVector;

use crate::domain::{ConvergenceRule, MonthlyObservation, OeConfig, OeFit};
use crate::error::ObservationError;
use crate::fit::gauss_newton::GaussNewton;
use crate::fit::mask::{MaskedSamples, mask_samples};
use crate::logging::{FitLogger, LogFacade};
use crate::math::linalg::{correlation, prior_covariance};
use crate::models::forward;

/// Single-month optimal-estimation solver.
#[derive(Debug, Clone)]
pub struct OptimalEstimator<L: FitLogger = LogFacade> {
    config: OeConfig,
    logger: L,
}

impl<L: FitLogger> OptimalEstimator<L> {
    pub fn new(config: OeConfig, logger: L) -> Result<Self, ObservationError> {
        config.validate()?;
        Ok(Self { config, logger })
    }

    pub fn config(&self) -> &OeConfig {
        &self.config
    }

    /// Mask one month to the configured wind-speed window and fit it.
    pub fn fit(&self, obs: &MonthlyObservation) -> OeFit {
        let samples = mask_samples(obs, &self.config.ws_range);
        if samples.is_empty() {
            self.logger.warn(&format!(
                "{}: no usable samples in the wind-speed window, the prior is returned",
                obs.month().format("%Y-%m")
            ));
        }
        self.fit_samples(&samples)
    }

    /// Fit already-masked samples.
    pub fn fit_samples(&self, samples: &MaskedSamples) -> OeFit {
        let cfg = &self.config;
        let input = samples.forward_input(false);
        let y_obs = DVector::from_column_slice(&samples.c);
        let prior_state = DVector::from_row_slice(&[cfg.initial_guess.0, cfg.initial_guess.1]);
        let sa = prior_covariance(cfg.prior_sd.0, cfg.prior_sd.1, cfg.prior_rho);

        let out = GaussNewton {
            y_obs: &y_obs,
            prior_state: &prior_state,
            sa: &sa,
            ridge: cfg.ridge,
            rule: ConvergenceRule::RelativeStep { tol: cfg.tol },
            max_iterations: cfg.max_iterations,
            logger: &self.logger,
        }
        .run(|beta| forward(&input, beta[0], beta[1]));

        OeFit {
            q: out.state[0],
            tau: out.state[1],
            r_hat: correlation(&out.posterior_cov, 0, 1),
            state: out.state,
            prior_state,
            ws: samples.ws.clone(),
            c: samples.c.clone(),
            d: samples.d.clone(),
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
            status: out.status,
        }
    }
}
