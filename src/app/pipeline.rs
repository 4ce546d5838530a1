//! Shared run logic behind the `ime` subcommands.
//!
//! `ingest -> settings -> estimator per month (or jointly) -> results`.
//! Printing is left to the caller so the same steps serve the CLI and tests.

use std::path::Path;

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::data::{SimulatedMonth, SimulationConfig, simulate_month};
use crate::domain::{EmissionEstimate, FitMethod, MonthlyObservation, MultiMonthFit, OeFit, TwoPassFit};
use crate::error::AppError;
use crate::fit::{JointEstimator, JointPrior, OptimalEstimator, TwoPassFitter, sum_to_emission};
use crate::io::config::SolverSettings;
use crate::io::export::write_months_csv;
use crate::logging::FitLogger;
use crate::math::month::{MonthPrior, build_multi_month_prior};

/// One month's result of `ime fit`.
#[derive(Debug, Clone, Serialize)]
pub struct MonthResult {
    pub month: NaiveDate,
    pub outcome: MonthOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum MonthOutcome {
    Oe(OeFit),
    Curve(TwoPassFit),
    Sum(EmissionEstimate),
}

/// Shared prior of a joint run: the same mean and spread for every month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointPriorSpec {
    pub q: f64,
    pub tau: f64,
    pub sd_q: f64,
    pub sd_tau: f64,
    pub rho: f64,
    /// Month-distance decay scale.
    pub corr_scale: f64,
}

/// Simulate `n_months` consecutive months starting at `config.month` and write them as CSV.
///
/// Each month uses its own seed (`seed + i`).
pub fn simulate_to_csv(
    config: &SimulationConfig,
    n_months: usize,
    path: &Path,
) -> Result<Vec<SimulatedMonth>, AppError> {
    if n_months == 0 {
        return Err(AppError::new(2, "Month count must be > 0."));
    }
    let mut out = Vec::with_capacity(n_months);
    for i in 0..n_months {
        let month = config
            .month
            .checked_add_months(Months::new(i as u32))
            .ok_or_else(|| AppError::new(2, "Month out of range."))?;
        let month_config = SimulationConfig {
            month,
            seed: config.seed.wrapping_add(i as u64),
            ..config.clone()
        };
        out.push(simulate_month(&month_config)?);
    }
    let observations: Vec<MonthlyObservation> = out.iter().map(|s| s.observation.clone()).collect();
    write_months_csv(path, &observations)?;
    Ok(out)
}

/// Fit every month independently with `method`.
pub fn fit_months<L: FitLogger>(
    months: &[MonthlyObservation],
    method: FitMethod,
    settings: &SolverSettings,
    logger: L,
) -> Result<Vec<MonthResult>, AppError> {
    if months.is_empty() {
        return Err(AppError::new(3, "No months to fit."));
    }
    let results: Vec<MonthResult> = match method {
        FitMethod::Oe => {
            let solver = OptimalEstimator::new(settings.oe.clone(), logger)?;
            months
                .iter()
                .map(|m| MonthResult {
                    month: m.month(),
                    outcome: MonthOutcome::Oe(solver.fit(m)),
                })
                .collect()
        }
        FitMethod::Curve => {
            let fitter = TwoPassFitter::new(settings.curve.clone(), logger)?;
            months
                .iter()
                .map(|m| MonthResult {
                    month: m.month(),
                    outcome: MonthOutcome::Curve(fitter.fit(m)),
                })
                .collect()
        }
        FitMethod::Sum => months
            .iter()
            .map(|m| {
                Ok(MonthResult {
                    month: m.month(),
                    outcome: MonthOutcome::Sum(sum_to_emission(m, &settings.sum)?),
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?,
    };
    Ok(results)
}

/// Assemble the month-correlated prior for `months`.
pub fn joint_prior(months: &[MonthlyObservation], spec: &JointPriorSpec) -> Result<JointPrior, AppError> {
    let per_month: Vec<MonthPrior> = months
        .iter()
        .map(|m| MonthPrior {
            month: m.calendar_month(),
            sd_q: spec.sd_q,
            sd_tau: spec.sd_tau,
        })
        .collect();
    let covariance = build_multi_month_prior(&per_month, spec.corr_scale, spec.rho)?;
    Ok(JointPrior {
        q: vec![spec.q; months.len()],
        tau: vec![spec.tau; months.len()],
        covariance,
    })
}

/// Joint fit of all months.
pub fn fit_joint<L: FitLogger>(
    months: &[MonthlyObservation],
    spec: &JointPriorSpec,
    settings: &SolverSettings,
    logger: L,
) -> Result<MultiMonthFit, AppError> {
    if months.is_empty() {
        return Err(AppError::new(3, "No months to fit."));
    }
    let prior = joint_prior(months, spec)?;
    let solver = JointEstimator::new(settings.joint.clone(), logger)?;
    Ok(solver.fit(months, &prior)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SilentLogger;

    fn simulated(n_months: usize) -> Vec<MonthlyObservation> {
        (0..n_months)
            .map(|i| {
                let config = SimulationConfig {
                    month: NaiveDate::from_ymd_opt(2019, 1 + i as u32, 1).unwrap(),
                    noise_sd: 0.0,
                    seed: i as u64,
                    ..SimulationConfig::default()
                };
                simulate_month(&config).unwrap().observation
            })
            .collect()
    }

    #[test]
    fn every_method_yields_one_result_per_month() {
        let months = simulated(2);
        let settings = SolverSettings::default();
        for method in [FitMethod::Oe, FitMethod::Curve, FitMethod::Sum] {
            let results = fit_months(&months, method, &settings, SilentLogger).unwrap();
            assert_eq!(results.len(), 2);
            assert_eq!(results[1].month, months[1].month());
        }
    }

    #[test]
    fn sum_at_true_lifetime_recovers_emission() {
        let months = simulated(1);
        let results = fit_months(&months, FitMethod::Sum, &SolverSettings::default(), SilentLogger).unwrap();
        let MonthOutcome::Sum(est) = &results[0].outcome else {
            panic!("expected a sum estimate");
        };
        assert!((est.q - 500.0).abs() < 1e-6);
    }

    #[test]
    fn joint_fit_covers_all_months() {
        let months = simulated(3);
        let spec = JointPriorSpec {
            q: 500.0,
            tau: 10800.0,
            sd_q: 300.0,
            sd_tau: 7200.0,
            rho: 0.2,
            corr_scale: 1.0,
        };
        let fit = fit_joint(&months, &spec, &SolverSettings::default(), SilentLogger).unwrap();
        assert_eq!(fit.q.len(), 3);
        assert!(fit.status.is_success());
        for q in &fit.q {
            assert!((q - 500.0).abs() < 5.0, "q = {q}");
        }
    }

    #[test]
    fn empty_input_is_reported() {
        let err = fit_months(&[], FitMethod::Oe, &SolverSettings::default(), SilentLogger).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
