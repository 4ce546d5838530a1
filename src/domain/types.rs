//! Shared domain types.
//!
//! Inputs are validated when they are built so that solvers never have to
//! deal with ragged arrays or nonsensical geometry. Outputs are plain records
//! with every field declared up front; failed fits carry NaN values plus an
//! explicit status tag.

use std::ops::Range;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::ObservationError;
use crate::math::lm::LmOptions;

/// Shape factor used when a loader does not supply one.
pub const DEFAULT_SHAPE_FACTOR: f64 = 2.0;

/// Seconds per hour, used for reporting lifetimes.
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Unitless plume-shape factor `f`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeFactor {
    /// One value broadcast to every sample.
    Uniform(f64),
    /// One value per sample.
    PerSample(Vec<f64>),
}

impl Default for ShapeFactor {
    fn default() -> Self {
        ShapeFactor::Uniform(DEFAULT_SHAPE_FACTOR)
    }
}

impl ShapeFactor {
    fn expand(&self, n: usize) -> Result<Vec<f64>, ObservationError> {
        let values = match self {
            ShapeFactor::Uniform(v) => vec![*v; n],
            ShapeFactor::PerSample(v) => {
                if v.len() != n {
                    return Err(ObservationError::LengthMismatch {
                        field: "f",
                        expected: n,
                        actual: v.len(),
                    });
                }
                v.clone()
            }
        };
        if let Some((index, &value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v > 0.0))
        {
            return Err(ObservationError::InvalidShapeFactor { index, value });
        }
        Ok(values)
    }
}

/// Inclusive wind-speed window (m/s) of samples used in a fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindRange {
    pub low: f64,
    pub high: f64,
}

impl WindRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, ws: f64) -> bool {
        ws >= self.low && ws <= self.high
    }

    pub fn validate(&self) -> Result<(), ObservationError> {
        if self.low.is_nan() || self.high.is_nan() || self.low > self.high {
            return Err(ObservationError::InvalidWindRange {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

/// One month of wind-binned mass-enhancement samples for a basin.
///
/// Index `i` of every per-sample array refers to the same sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyObservation {
    month: NaiveDate,
    ws: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
    b: Vec<f64>,
    length_scale: f64,
    shape: Vec<f64>,
    background: Option<Vec<f64>>,
}

impl MonthlyObservation {
    /// Build a record with the default shape factor and no background column.
    ///
    /// NaN weights `b` and uncertainties `d` are cleaned to 0. The date is
    /// normalized to the first day of its month.
    pub fn new(
        month: NaiveDate,
        ws: Vec<f64>,
        c: Vec<f64>,
        d: Vec<f64>,
        b: Vec<f64>,
        length_scale: f64,
    ) -> Result<Self, ObservationError> {
        let n = ws.len();
        check_len("C", n, c.len())?;
        check_len("D", n, d.len())?;
        check_len("B", n, b.len())?;
        if !(length_scale.is_finite() && length_scale > 0.0) {
            return Err(ObservationError::InvalidLengthScale(length_scale));
        }

        let month = month.with_day(1).unwrap_or(month);
        Ok(Self {
            month,
            ws,
            c,
            d: clean_nan(d),
            b: clean_nan(b),
            length_scale,
            shape: ShapeFactor::default().expand(n)?,
            background: None,
        })
    }

    pub fn with_shape_factor(mut self, shape: ShapeFactor) -> Result<Self, ObservationError> {
        self.shape = shape.expand(self.ws.len())?;
        Ok(self)
    }

    pub fn with_background(mut self, background: Vec<f64>) -> Result<Self, ObservationError> {
        check_len("Omega_bg", self.ws.len(), background.len())?;
        self.background = Some(background);
        Ok(self)
    }

    pub fn month(&self) -> NaiveDate {
        self.month
    }

    /// Calendar month, 1-12.
    pub fn calendar_month(&self) -> u32 {
        self.month.month()
    }

    pub fn len(&self) -> usize {
        self.ws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ws.is_empty()
    }

    pub fn ws(&self) -> &[f64] {
        &self.ws
    }

    pub fn c(&self) -> &[f64] {
        &self.c
    }

    pub fn d(&self) -> &[f64] {
        &self.d
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    /// Basin area `A = L^2` (m^2).
    pub fn area(&self) -> f64 {
        self.length_scale * self.length_scale
    }

    pub fn shape_factor(&self) -> &[f64] {
        &self.shape
    }

    pub fn background(&self) -> Option<&[f64]> {
        self.background.as_deref()
    }
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), ObservationError> {
    if expected != actual {
        return Err(ObservationError::LengthMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn clean_nan(mut values: Vec<f64>) -> Vec<f64> {
    for v in values.iter_mut().filter(|v| v.is_nan()) {
        *v = 0.0;
    }
    values
}

/// Contiguous per-month slices of a pooled sample array.
///
/// Built once from per-month sample counts; month `i` owns `ranges()[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthRanges {
    ranges: Vec<Range<usize>>,
}

impl MonthRanges {
    pub fn from_counts(counts: &[usize]) -> Self {
        let mut start = 0;
        let ranges = counts
            .iter()
            .map(|&n| {
                let r = start..start + n;
                start += n;
                r
            })
            .collect();
        Self { ranges }
    }

    pub fn months(&self) -> usize {
        self.ranges.len()
    }

    /// Total number of pooled samples.
    pub fn total(&self) -> usize {
        self.ranges.last().map(|r| r.end).unwrap_or(0)
    }

    pub fn counts(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.len()).collect()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }
}

/// Estimator applied to each month by `ime fit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    /// Single-month optimal estimation.
    Oe,
    /// Two-pass least-squares curve fit.
    Curve,
    /// Closed-form weighted sum at a fixed lifetime.
    Sum,
}

impl FitMethod {
    pub fn display_name(self) -> &'static str {
        match self {
            FitMethod::Oe => "optimal estimation",
            FitMethod::Curve => "two-pass curve fit",
            FitMethod::Sum => "emission sum",
        }
    }
}

/// Single-month optimal-estimation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OeConfig {
    /// Prior mean and first iterate `(Q0, tau0)` in (mol/s, s).
    pub initial_guess: (f64, f64),
    /// Scaling of the prior precision relative to the observation term.
    pub ridge: f64,
    /// Prior standard deviations `(sigma_Q, sigma_tau)`.
    pub prior_sd: (f64, f64),
    /// Prior correlation between Q and tau.
    pub prior_rho: f64,
    pub ws_range: WindRange,
    /// Tolerance on the relative step norm `||dbeta / beta0||`.
    pub tol: f64,
    pub max_iterations: usize,
}

impl Default for OeConfig {
    fn default() -> Self {
        Self {
            initial_guess: (500.0, 10800.0),
            ridge: 1e-10,
            prior_sd: (300.0, 7200.0),
            prior_rho: 0.2,
            ws_range: WindRange::new(2.0, 8.0),
            tol: 1e-10,
            max_iterations: 100,
        }
    }
}

impl OeConfig {
    pub fn validate(&self) -> Result<(), ObservationError> {
        self.ws_range.validate()?;
        check_ridge(self.ridge)?;
        let (sd_q, sd_tau) = self.prior_sd;
        if !(sd_q.is_finite() && sd_tau.is_finite() && sd_q > 0.0 && sd_tau > 0.0) {
            return Err(ObservationError::InvalidPrior(format!(
                "prior standard deviations must be finite and > 0, got ({sd_q}, {sd_tau})"
            )));
        }
        if !(self.prior_rho > -1.0 && self.prior_rho < 1.0) {
            return Err(ObservationError::InvalidPrior(format!(
                "prior correlation must lie in (-1, 1), got {}",
                self.prior_rho
            )));
        }
        let (q0, tau0) = self.initial_guess;
        if !(q0.is_finite() && tau0.is_finite()) || q0 == 0.0 || tau0 == 0.0 {
            return Err(ObservationError::InvalidPrior(format!(
                "initial guess must be finite and non-zero, got ({q0}, {tau0})"
            )));
        }
        check_tol(self.tol)
    }
}

/// Multi-month joint optimal-estimation settings.
///
/// The prior state and covariance are supplied per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiMonthConfig {
    pub ridge: f64,
    pub ws_range: WindRange,
    pub tol: f64,
    pub max_iterations: usize,
    /// 0 selects the relative-step rule; > 0 selects the dsigma-square rule.
    pub convergence_threshold: f64,
}

impl Default for MultiMonthConfig {
    fn default() -> Self {
        Self {
            ridge: 3.3e-10,
            ws_range: WindRange::new(2.0, 8.0),
            tol: 1e-10,
            max_iterations: 100,
            convergence_threshold: 0.0,
        }
    }
}

impl MultiMonthConfig {
    pub fn validate(&self) -> Result<(), ObservationError> {
        self.ws_range.validate()?;
        check_ridge(self.ridge)?;
        check_tol(self.tol)?;
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold >= 0.0) {
            return Err(ObservationError::InvalidConfig(format!(
                "convergence threshold must be finite and >= 0, got {}",
                self.convergence_threshold
            )));
        }
        if self.convergence_threshold > 0.0 && self.ridge == 0.0 {
            return Err(ObservationError::InvalidConfig(
                "the dsigma-square rule needs a ridge factor > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn convergence_rule(&self) -> ConvergenceRule {
        if self.convergence_threshold > 0.0 {
            ConvergenceRule::DsigmaSquare {
                threshold: self.convergence_threshold,
            }
        } else {
            ConvergenceRule::RelativeStep { tol: self.tol }
        }
    }
}

fn check_ridge(ridge: f64) -> Result<(), ObservationError> {
    if !(ridge.is_finite() && ridge >= 0.0) {
        return Err(ObservationError::InvalidConfig(format!(
            "ridge factor must be finite and >= 0, got {ridge}"
        )));
    }
    Ok(())
}

fn check_tol(tol: f64) -> Result<(), ObservationError> {
    if !(tol.is_finite() && tol >= 0.0) {
        return Err(ObservationError::InvalidConfig(format!(
            "tolerance must be finite and >= 0, got {tol}"
        )));
    }
    Ok(())
}

/// Stopping rule of the Gauss-Newton loop (the iteration cap always applies).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceRule {
    /// Stop once `||dbeta / beta0|| <= tol`.
    RelativeStep { tol: f64 },
    /// Stop once `dsigma^2 <= threshold * n_state`.
    DsigmaSquare { threshold: f64 },
}

/// Robust two-pass curve-fit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveFitConfig {
    pub initial_guess: (f64, f64),
    pub ws_range: WindRange,
    /// Samples with `|residual| > threshold * predicted` are dropped before the refit.
    pub residual_threshold: f64,
    /// Subtract the background column when the record carries one.
    pub use_background: bool,
    pub lm: LmOptions,
}

impl Default for CurveFitConfig {
    fn default() -> Self {
        Self {
            initial_guess: (500.0, 10800.0),
            ws_range: WindRange::new(2.0, 8.0),
            residual_threshold: 0.2,
            use_background: false,
            lm: LmOptions::default(),
        }
    }
}

impl CurveFitConfig {
    pub fn validate(&self) -> Result<(), ObservationError> {
        self.ws_range.validate()?;
        if !(self.residual_threshold.is_finite() && self.residual_threshold >= 0.0) {
            return Err(ObservationError::InvalidConfig(format!(
                "residual threshold must be finite and >= 0, got {}",
                self.residual_threshold
            )));
        }
        let (q0, tau0) = self.initial_guess;
        if !(q0.is_finite() && tau0.is_finite()) {
            return Err(ObservationError::InvalidConfig(format!(
                "initial guess must be finite, got ({q0}, {tau0})"
            )));
        }
        Ok(())
    }
}

/// Closed-form emission aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionSumConfig {
    /// Assumed chemical lifetime (s).
    pub tau: f64,
    /// When false, the ventilation term is dropped and `Q_i = C_i * A / tau`.
    pub use_wind_speed: bool,
    pub ws_range: WindRange,
}

impl Default for EmissionSumConfig {
    fn default() -> Self {
        Self {
            tau: 10800.0,
            use_wind_speed: true,
            ws_range: WindRange::new(0.0, 21.0),
        }
    }
}

impl EmissionSumConfig {
    pub fn validate(&self) -> Result<(), ObservationError> {
        self.ws_range.validate()?;
        if !(self.tau.is_finite() && self.tau > 0.0) {
            return Err(ObservationError::InvalidConfig(format!(
                "lifetime must be finite and > 0, got {}",
                self.tau
            )));
        }
        Ok(())
    }
}

/// How an optimal-estimation loop ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FitStatus {
    Converged,
    MaxIterations,
    /// A linear solve failed during iteration `iteration`; the last good state is reported.
    LinalgFailure { iteration: usize, reason: String },
    /// Iteration finished but the posterior diagnostics could not be computed.
    PosteriorFailure { reason: String },
}

impl FitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

/// Single-month optimal-estimation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OeFit {
    pub q: f64,
    pub tau: f64,
    pub state: DVector<f64>,
    pub prior_state: DVector<f64>,
    pub ws: Vec<f64>,
    pub c: Vec<f64>,
    pub d: Vec<f64>,
    /// Forward model at the prior state.
    pub y_hat_prior: DVector<f64>,
    pub y_hat: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub averaging_kernel: DMatrix<f64>,
    pub posterior_cov: DMatrix<f64>,
    pub r_hat: f64,
    pub residual: DVector<f64>,
    pub residual_rms: f64,
    pub n_iter: usize,
    pub j_prior: f64,
    pub j_obs: f64,
    pub status: FitStatus,
}

/// Multi-month joint optimal-estimation result.
///
/// The state is `(Q_1..Q_m, tau_1..tau_m)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiMonthFit {
    pub months: Vec<NaiveDate>,
    pub q: Vec<f64>,
    pub tau: Vec<f64>,
    pub state: DVector<f64>,
    pub prior_state: DVector<f64>,
    pub ranges: MonthRanges,
    pub ws: Vec<f64>,
    pub c: Vec<f64>,
    pub y_hat_prior: DVector<f64>,
    pub y_hat: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub averaging_kernel: DMatrix<f64>,
    pub posterior_cov: DMatrix<f64>,
    /// Posterior correlation of `Q_1` and `tau_1`.
    pub r_hat: f64,
    pub r_hat_per_month: Vec<f64>,
    pub residual: DVector<f64>,
    pub residual_rms: f64,
    pub n_iter: usize,
    pub j_prior: f64,
    pub j_obs: f64,
    /// Last value of the active stopping statistic.
    pub convergence_statistic: f64,
    pub status: FitStatus,
}

/// Outcome of one curve-fit pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PassStatus {
    Fitted,
    /// No sample was rejected, so the first pass stands in for the second.
    ReusedFirstPass,
    Failed { reason: String },
}

/// One pass of the robust curve fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveFitPass {
    pub ws: Vec<f64>,
    pub c: Vec<f64>,
    pub d: Vec<f64>,
    pub background: Vec<f64>,
    pub y_hat: Vec<f64>,
    pub residual: Vec<f64>,
    /// `(Q, tau)`.
    pub params: DVector<f64>,
    pub param_cov: DMatrix<f64>,
    pub status: PassStatus,
}

impl CurveFitPass {
    pub fn q(&self) -> f64 {
        self.params[0]
    }

    pub fn tau(&self) -> f64 {
        self.params[1]
    }
}

/// Robust two-pass curve-fit result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoPassFit {
    pub first: CurveFitPass,
    pub second: CurveFitPass,
    /// Indices into the first-pass samples that were dropped before the refit.
    pub rejected: Vec<usize>,
}

/// Closed-form weighted emission estimate at a fixed lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmissionEstimate {
    pub q: f64,
    pub tau: f64,
    pub n_samples: usize,
    pub total_weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 7, 15).unwrap()
    }

    #[test]
    fn observation_rejects_ragged_arrays() {
        let err = MonthlyObservation::new(
            month(),
            vec![1.0, 2.0],
            vec![1.0],
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            5e4,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ObservationError::LengthMismatch {
                field: "C",
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn observation_cleans_nan_weights_and_normalizes_month() {
        let obs = MonthlyObservation::new(
            month(),
            vec![3.0, 4.0],
            vec![1e-3, 2e-3],
            vec![f64::NAN, 1.0],
            vec![2.0, f64::NAN],
            5e4,
        )
        .unwrap();
        assert_eq!(obs.b(), &[2.0, 0.0]);
        assert_eq!(obs.d(), &[0.0, 1.0]);
        assert_eq!(obs.month(), NaiveDate::from_ymd_opt(2019, 7, 1).unwrap());
        assert_eq!(obs.calendar_month(), 7);
        assert_eq!(obs.shape_factor(), &[DEFAULT_SHAPE_FACTOR; 2]);
    }

    #[test]
    fn observation_validates_geometry_and_shape() {
        let base = || {
            MonthlyObservation::new(month(), vec![3.0], vec![1.0], vec![0.0], vec![1.0], 5e4).unwrap()
        };
        assert!(matches!(
            MonthlyObservation::new(month(), vec![], vec![], vec![], vec![], 0.0),
            Err(ObservationError::InvalidLengthScale(_))
        ));
        assert!(matches!(
            base().with_shape_factor(ShapeFactor::Uniform(-1.0)),
            Err(ObservationError::InvalidShapeFactor { index: 0, .. })
        ));
        assert!(matches!(
            base().with_shape_factor(ShapeFactor::PerSample(vec![1.0, 2.0])),
            Err(ObservationError::LengthMismatch { field: "f", .. })
        ));
        assert!(base().with_background(vec![0.5]).unwrap().background().is_some());
    }

    #[test]
    fn month_ranges_are_contiguous() {
        let ranges = MonthRanges::from_counts(&[3, 0, 2]);
        assert_eq!(ranges.ranges(), &[0..3, 3..3, 3..5]);
        assert_eq!(ranges.total(), 5);
        assert_eq!(ranges.counts(), vec![3, 0, 2]);
    }

    #[test]
    fn multi_month_rule_follows_threshold() {
        let mut cfg = MultiMonthConfig::default();
        assert_eq!(cfg.convergence_rule(), ConvergenceRule::RelativeStep { tol: 1e-10 });
        cfg.convergence_threshold = 0.5;
        assert_eq!(cfg.convergence_rule(), ConvergenceRule::DsigmaSquare { threshold: 0.5 });
        cfg.ridge = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oe_config_rejects_degenerate_prior() {
        let cfg = OeConfig {
            prior_rho: 1.0,
            ..OeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ObservationError::InvalidPrior(_))));
        assert!(OeConfig::default().validate().is_ok());
    }
}
