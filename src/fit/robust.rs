//! Robust two-pass curve fit of `(Q, tau)`.
//!
//! Pass 1 fits all masked samples by unconstrained least squares (no prior).
//! Samples whose fractional residual `|r| / y_hat` exceeds the threshold are
//! then dropped and pass 2 refits the rest.
//!
//! Failures are never fatal:
//! - pass 1 fails: both passes are NaN-filled
//! - nothing to drop: pass 1 is reused as pass 2 without refitting
//! - pass 2 fails: only pass 2 is NaN-filled

use nalgebra::DVector;

use crate::domain::{CurveFitConfig, CurveFitPass, MonthlyObservation, PassStatus, TwoPassFit};
use crate::error::ObservationError;
use crate::fit::mask::{MaskedSamples, mask_samples};
use crate::logging::{FitLogger, LogFacade};
use crate::math::linalg::{nan_matrix, nan_vector};
use crate::math::lm::{LeastSquaresError, LmSolution, levenberg_marquardt};
use crate::models::forward;

/// Two-pass curve fitter with residual-based outlier rejection.
#[derive(Debug, Clone)]
pub struct TwoPassFitter<L: FitLogger = LogFacade> {
    config: CurveFitConfig,
    logger: L,
}

impl<L: FitLogger> TwoPassFitter<L> {
    pub fn new(config: CurveFitConfig, logger: L) -> Result<Self, ObservationError> {
        config.validate()?;
        Ok(Self { config, logger })
    }

    pub fn config(&self) -> &CurveFitConfig {
        &self.config
    }

    pub fn fit(&self, obs: &MonthlyObservation) -> TwoPassFit {
        let mut samples = mask_samples(obs, &self.config.ws_range);
        if self.config.use_background {
            if obs.background().is_none() {
                self.logger.warn("background column does not exist! use zeros");
            }
        } else {
            samples.background.iter_mut().for_each(|v| *v = 0.0);
        }
        self.fit_samples(&samples)
    }

    /// Fit already-masked samples; the background column is used as given.
    pub fn fit_samples(&self, samples: &MaskedSamples) -> TwoPassFit {
        let first = match self.run_pass(samples) {
            Ok(sol) => fitted_pass(samples, sol),
            Err(e) => {
                self.logger.warn(&format!("fitting error occurred: {e}"));
                let failed = failed_pass(samples, &e);
                return TwoPassFit {
                    first: failed.clone(),
                    second: failed,
                    rejected: Vec::new(),
                };
            }
        };

        let threshold = self.config.residual_threshold;
        let keep: Vec<bool> = first
            .residual
            .iter()
            .zip(&first.y_hat)
            .map(|(r, y)| r.abs() <= threshold * y)
            .collect();
        let rejected: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| (!k).then_some(i))
            .collect();

        if rejected.is_empty() {
            let mut second = first.clone();
            second.status = PassStatus::ReusedFirstPass;
            return TwoPassFit {
                first,
                second,
                rejected,
            };
        }

        self.logger.warn(&format!(
            "{} residuals larger than {:.0}%, remove and fit again...",
            rejected.len(),
            threshold * 100.0
        ));
        let reduced = samples.retain(&keep);
        let second = match self.run_pass(&reduced) {
            Ok(sol) => fitted_pass(&reduced, sol),
            Err(e) => {
                self.logger.warn(&format!("fitting error occurred: {e}"));
                failed_pass(&reduced, &e)
            }
        };

        TwoPassFit {
            first,
            second,
            rejected,
        }
    }

    fn run_pass(&self, samples: &MaskedSamples) -> Result<LmSolution, LeastSquaresError> {
        let input = samples.forward_input(true);
        let y = DVector::from_column_slice(&samples.c);
        let (q0, tau0) = self.config.initial_guess;
        levenberg_marquardt(
            |p| {
                let eval = forward(&input, p[0], p[1]);
                (eval.y, eval.jacobian)
            },
            &y,
            DVector::from_row_slice(&[q0, tau0]),
            &self.config.lm,
        )
    }
}

fn fitted_pass(samples: &MaskedSamples, sol: LmSolution) -> CurveFitPass {
    let y_hat: Vec<f64> = sol.predictions.iter().copied().collect();
    let residual = samples.c.iter().zip(&y_hat).map(|(c, y)| c - y).collect();
    CurveFitPass {
        ws: samples.ws.clone(),
        c: samples.c.clone(),
        d: samples.d.clone(),
        background: samples.background.clone(),
        y_hat,
        residual,
        params: sol.params,
        param_cov: sol.covariance,
        status: PassStatus::Fitted,
    }
}

fn failed_pass(samples: &MaskedSamples, err: &LeastSquaresError) -> CurveFitPass {
    let n = samples.len();
    CurveFitPass {
        ws: samples.ws.clone(),
        c: samples.c.clone(),
        d: samples.d.clone(),
        background: samples.background.clone(),
        y_hat: vec![f64::NAN; n],
        residual: vec![f64::NAN; n],
        params: nan_vector(2),
        param_cov: nan_matrix(2, 2),
        status: PassStatus::Failed {
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SilentLogger;
    use crate::logging::testing::{Level, RecordingLogger};
    use crate::models::{ForwardInput, predict};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    const L: f64 = 50_000.0;

    fn month_with(ws: &[f64], c: Vec<f64>) -> MonthlyObservation {
        MonthlyObservation::new(
            NaiveDate::from_ymd_opt(2018, 8, 1).unwrap(),
            ws.to_vec(),
            c,
            vec![0.0; ws.len()],
            vec![1.0; ws.len()],
            L,
        )
        .unwrap()
    }

    fn clean_curve(ws: &[f64], q: f64, tau: f64) -> Vec<f64> {
        let f = vec![2.0; ws.len()];
        predict(&ForwardInput::new(ws, &f, L), q, tau)
    }

    fn wind() -> Vec<f64> {
        (0..13).map(|i| 2.0 + 0.5 * i as f64).collect()
    }

    #[test]
    fn clean_data_reuses_first_pass() {
        let ws = wind();
        let obs = month_with(&ws, clean_curve(&ws, 540.0, 9500.0));
        let fit = TwoPassFitter::new(CurveFitConfig::default(), SilentLogger)
            .unwrap()
            .fit(&obs);
        assert_eq!(fit.first.status, PassStatus::Fitted);
        assert_eq!(fit.second.status, PassStatus::ReusedFirstPass);
        assert!(fit.rejected.is_empty());
        assert_relative_eq!(fit.first.q(), 540.0, max_relative = 1e-5);
        assert_relative_eq!(fit.first.tau(), 9500.0, max_relative = 1e-5);
        assert_eq!(fit.second.params, fit.first.params);
    }

    #[test]
    fn single_outlier_is_removed_before_refit() {
        let ws = wind();
        let mut c = clean_curve(&ws, 500.0, 10800.0);
        c[6] *= 1.6;
        let logger = RecordingLogger::default();
        let fit = TwoPassFitter::new(CurveFitConfig::default(), &logger)
            .unwrap()
            .fit(&month_with(&ws, c));

        assert_eq!(fit.rejected, vec![6]);
        assert_eq!(fit.first.c.len() - 1, fit.second.c.len());
        assert_eq!(fit.second.status, PassStatus::Fitted);
        assert!(!fit.second.ws.contains(&ws[6]));
        assert_relative_eq!(fit.second.q(), 500.0, max_relative = 1e-5);
        assert_relative_eq!(fit.second.tau(), 10800.0, max_relative = 1e-5);
        assert!(logger.contains(Level::Warn, "1 residuals larger than 20%"));
    }

    #[test]
    fn first_pass_failure_fills_both_passes_with_nan() {
        let obs = month_with(&[3.0], vec![1e-3]);
        let fit = TwoPassFitter::new(CurveFitConfig::default(), SilentLogger)
            .unwrap()
            .fit(&obs);
        for pass in [&fit.first, &fit.second] {
            assert!(matches!(pass.status, PassStatus::Failed { .. }));
            assert!(pass.q().is_nan() && pass.tau().is_nan());
            assert!(pass.y_hat.iter().all(|v| v.is_nan()));
            assert!(pass.param_cov.iter().all(|v| v.is_nan()));
            assert_eq!(pass.c, vec![1e-3]);
        }
    }

    #[test]
    fn second_pass_failure_keeps_first_pass() {
        // A zero threshold rejects every sample of a curve that cannot be fit exactly.
        let ws = wind();
        let mut c = clean_curve(&ws, 500.0, 10800.0);
        c[2] *= 1.1;
        c[9] *= 0.93;
        let config = CurveFitConfig {
            residual_threshold: 0.0,
            ..CurveFitConfig::default()
        };
        let fit = TwoPassFitter::new(config, SilentLogger)
            .unwrap()
            .fit(&month_with(&ws, c));
        assert_eq!(fit.first.status, PassStatus::Fitted);
        assert!(fit.first.q().is_finite());
        assert_eq!(fit.rejected.len(), ws.len());
        assert!(matches!(fit.second.status, PassStatus::Failed { .. }));
        assert!(fit.second.q().is_nan());
        assert!(fit.second.c.is_empty() && fit.second.y_hat.is_empty());
    }

    #[test]
    fn background_is_ignored_unless_enabled() {
        let ws = wind();
        let bg = vec![1e-4; ws.len()];
        let obs = month_with(&ws, clean_curve(&ws, 500.0, 10800.0))
            .with_background(bg)
            .unwrap();
        let off = TwoPassFitter::new(CurveFitConfig::default(), SilentLogger)
            .unwrap()
            .fit(&obs);
        assert!(off.first.background.iter().all(|v| *v == 0.0));

        let logger = RecordingLogger::default();
        let config = CurveFitConfig {
            use_background: true,
            ..CurveFitConfig::default()
        };
        let plain = month_with(&ws, clean_curve(&ws, 500.0, 10800.0));
        let on = TwoPassFitter::new(config, &logger).unwrap().fit(&plain);
        assert!(logger.contains(Level::Warn, "background column does not exist"));
        assert_relative_eq!(on.first.q(), 500.0, max_relative = 1e-5);
    }
}
