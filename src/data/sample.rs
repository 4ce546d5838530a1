//! Synthetic monthly IME observations generated from the forward model.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_SHAPE_FACTOR, MonthlyObservation, ShapeFactor, WindRange};
use crate::error::AppError;
use crate::models::{ForwardInput, predict};

/// Pixel counts per wind bin are drawn from `1..=MAX_PIXELS`.
const MAX_PIXELS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub month: NaiveDate,
    /// True emission rate (mol/s).
    pub q: f64,
    /// True lifetime (s).
    pub tau: f64,
    pub length_scale: f64,
    pub shape_factor: f64,
    pub n_samples: usize,
    /// Wind speeds are drawn uniformly from this window.
    pub ws_range: WindRange,
    /// Standard deviation of the multiplicative log-noise.
    pub noise_sd: f64,
    pub outlier_prob: f64,
    /// Outliers are scaled by this factor (or its inverse, with equal odds).
    pub outlier_factor: f64,
    /// Uniform background enhancement; `None` leaves the column out.
    pub background: Option<f64>,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            month: NaiveDate::from_ymd_opt(2019, 7, 1).unwrap_or_default(),
            q: 500.0,
            tau: 10800.0,
            length_scale: 50_000.0,
            shape_factor: DEFAULT_SHAPE_FACTOR,
            n_samples: 40,
            ws_range: WindRange::new(1.0, 10.0),
            noise_sd: 0.05,
            outlier_prob: 0.0,
            outlier_factor: 2.0,
            background: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedMonth {
    pub observation: MonthlyObservation,
    /// Noise-free forward model at each sample.
    pub baseline: Vec<f64>,
    /// Indices of the samples that received an outlier jump.
    pub outliers: Vec<usize>,
}

pub fn simulate_month(config: &SimulationConfig) -> Result<SimulatedMonth, AppError> {
    if config.n_samples == 0 {
        return Err(AppError::new(2, "Sample count must be > 0."));
    }
    config.ws_range.validate()?;
    if !(config.q.is_finite() && config.tau.is_finite() && config.q > 0.0 && config.tau > 0.0) {
        return Err(AppError::new(2, "True Q and tau must be finite and > 0."));
    }
    if !(0.0..1.0).contains(&config.outlier_prob) {
        return Err(AppError::new(2, "Outlier probability must lie in [0, 1)."));
    }
    if !(config.outlier_factor.is_finite() && config.outlier_factor > 0.0) {
        return Err(AppError::new(2, "Outlier factor must be finite and > 0."));
    }

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let normal = Normal::new(0.0, config.noise_sd)
        .map_err(|e| AppError::new(2, format!("Noise distribution error: {e}")))?;

    let n = config.n_samples;
    let mut ws: Vec<f64> = (0..n)
        .map(|_| rng.gen_range(config.ws_range.low..=config.ws_range.high))
        .collect();
    ws.sort_by(f64::total_cmp);

    let shape = vec![config.shape_factor; n];
    let bg = config.background.map(|v| vec![v; n]);
    let mut input = ForwardInput::new(&ws, &shape, config.length_scale);
    if let Some(b) = &bg {
        input = input.with_background(b);
    }
    let baseline = predict(&input, config.q, config.tau);

    let mut outliers = Vec::new();
    let mut c = Vec::with_capacity(n);
    for (i, &y) in baseline.iter().enumerate() {
        // Mean-corrected log-normal noise keeps E[C] on the baseline.
        let sigma = config.noise_sd;
        let mut value = y * (normal.sample(&mut rng) - 0.5 * sigma * sigma).exp();
        let roll: f64 = rng.r#gen();
        if roll < config.outlier_prob {
            value *= if rng.gen_bool(0.5) {
                config.outlier_factor
            } else {
                1.0 / config.outlier_factor
            };
            outliers.push(i);
        }
        c.push(value);
    }

    let d: Vec<f64> = (0..n).map(|_| f64::from(rng.gen_range(1..=MAX_PIXELS))).collect();
    let b = d.clone();

    let mut observation = MonthlyObservation::new(config.month, ws, c, d, b, config.length_scale)?
        .with_shape_factor(ShapeFactor::Uniform(config.shape_factor))?;
    if let Some(b) = bg {
        observation = observation.with_background(b)?;
    }

    Ok(SimulatedMonth {
        observation,
        baseline,
        outliers,
    })
}

fn sample_seed(config: &SimulationConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    config.month.hash(&mut hasher);
    config.n_samples.hash(&mut hasher);
    config.q.to_bits().hash(&mut hasher);
    config.tau.to_bits().hash(&mut hasher);
    config.length_scale.to_bits().hash(&mut hasher);
    config.ws_range.low.to_bits().hash(&mut hasher);
    config.ws_range.high.to_bits().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_month() {
        let config = SimulationConfig::default();
        let a = simulate_month(&config).unwrap();
        let b = simulate_month(&config).unwrap();
        assert_eq!(a.observation.c(), b.observation.c());
        assert_eq!(a.observation.ws(), b.observation.ws());

        let other = simulate_month(&SimulationConfig {
            seed: 7,
            ..config
        })
        .unwrap();
        assert_ne!(a.observation.c(), other.observation.c());
    }

    #[test]
    fn samples_stay_near_the_forward_model() {
        let config = SimulationConfig {
            n_samples: 200,
            noise_sd: 0.02,
            ..SimulationConfig::default()
        };
        let sim = simulate_month(&config).unwrap();
        let obs = &sim.observation;
        assert_eq!(obs.len(), 200);
        assert!(sim.outliers.is_empty());
        assert!(obs.ws().windows(2).all(|w| w[0] <= w[1]));
        assert!(obs.ws().iter().all(|&w| (1.0..=10.0).contains(&w)));
        for (c, y) in obs.c().iter().zip(&sim.baseline) {
            assert!((c / y - 1.0).abs() < 0.12, "ratio {}", c / y);
        }
        assert!(obs.b().iter().all(|&b| (1.0..=60.0).contains(&b)));
    }

    #[test]
    fn outliers_are_recorded() {
        let config = SimulationConfig {
            n_samples: 100,
            noise_sd: 0.0,
            outlier_prob: 0.3,
            outlier_factor: 3.0,
            ..SimulationConfig::default()
        };
        let sim = simulate_month(&config).unwrap();
        assert!(!sim.outliers.is_empty());
        for (i, (c, y)) in sim.observation.c().iter().zip(&sim.baseline).enumerate() {
            let ratio = c / y;
            if sim.outliers.contains(&i) {
                assert!((ratio - 3.0).abs() < 1e-9 || (ratio - 1.0 / 3.0).abs() < 1e-9);
            } else {
                assert!((ratio - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn rejects_bad_settings() {
        let bad = SimulationConfig {
            n_samples: 0,
            ..SimulationConfig::default()
        };
        assert_eq!(simulate_month(&bad).unwrap_err().exit_code(), 2);
        let bad = SimulationConfig {
            outlier_prob: 1.0,
            ..SimulationConfig::default()
        };
        assert!(simulate_month(&bad).is_err());
    }
}
