//! Closed-form emission estimate at a fixed lifetime.
//!
//! Inverting the forward model sample by sample gives
//! `Q_i = C_i * A * (ws_i / (L f_i) + 1/tau)`; the month's estimate is the
//! `B`-weighted mean of those values.

use crate::domain::{EmissionEstimate, EmissionSumConfig, MonthlyObservation};
use crate::error::ObservationError;
use crate::fit::mask::mask_samples;

/// Weighted-sum emission estimate of one month.
///
/// `q` is NaN when the kept samples carry no weight.
pub fn sum_to_emission(
    obs: &MonthlyObservation,
    config: &EmissionSumConfig,
) -> Result<EmissionEstimate, ObservationError> {
    config.validate()?;
    let s = mask_samples(obs, &config.ws_range);
    let area = s.length_scale * s.length_scale;
    let tau = config.tau;

    let (weighted, total_weight) = s
        .c
        .iter()
        .zip(&s.ws)
        .zip(&s.shape)
        .zip(&s.b)
        .fold((0.0, 0.0), |(num, den), (((&c, &ws), &f), &w)| {
            let ventilation = if config.use_wind_speed {
                ws / (s.length_scale * f)
            } else {
                0.0
            };
            let q_i = c * area * (ventilation + 1.0 / tau);
            (num + q_i * w, den + w)
        });

    let q = if total_weight != 0.0 {
        weighted / total_weight
    } else {
        f64::NAN
    };
    Ok(EmissionEstimate {
        q,
        tau,
        n_samples: s.len(),
        total_weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WindRange;
    use crate::models::{ForwardInput, predict};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    const L: f64 = 40_000.0;

    fn month(ws: Vec<f64>, c: Vec<f64>, b: Vec<f64>) -> MonthlyObservation {
        let n = ws.len();
        MonthlyObservation::new(
            NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            ws,
            c,
            vec![0.0; n],
            b,
            L,
        )
        .unwrap()
    }

    #[test]
    fn inverts_the_forward_model_at_the_true_lifetime() {
        let ws = vec![1.0, 3.0, 5.0, 9.0, 15.0];
        let f = vec![2.0; ws.len()];
        let c = predict(&ForwardInput::new(&ws, &f, L), 420.0, 7200.0);
        let b = vec![1.0, 4.0, 2.0, 0.5, 3.0];
        let config = EmissionSumConfig {
            tau: 7200.0,
            ..EmissionSumConfig::default()
        };
        let est = sum_to_emission(&month(ws, c, b), &config).unwrap();
        assert_relative_eq!(est.q, 420.0, max_relative = 1e-12);
        assert_eq!(est.n_samples, 5);
        assert_relative_eq!(est.total_weight, 10.5);
    }

    #[test]
    fn weights_skew_the_mean() {
        let a = L * L;
        let tau = 10800.0;
        // Per-sample emissions 100 and 400 without the wind term.
        let c = vec![100.0 * tau / a, 400.0 * tau / a];
        let config = EmissionSumConfig {
            tau,
            use_wind_speed: false,
            ..EmissionSumConfig::default()
        };
        let est = sum_to_emission(&month(vec![4.0, 6.0], c, vec![3.0, 1.0]), &config).unwrap();
        assert_relative_eq!(est.q, 175.0, max_relative = 1e-12);
    }

    #[test]
    fn window_and_nan_samples_are_excluded() {
        let a = L * L;
        let tau = 10800.0;
        let c = vec![200.0 * tau / a, f64::NAN, 900.0 * tau / a];
        let config = EmissionSumConfig {
            tau,
            use_wind_speed: false,
            ws_range: WindRange::new(0.0, 10.0),
        };
        let est = sum_to_emission(&month(vec![2.0, 3.0, 12.0], c, vec![1.0; 3]), &config).unwrap();
        assert_eq!(est.n_samples, 1);
        assert_relative_eq!(est.q, 200.0, max_relative = 1e-12);
    }

    #[test]
    fn zero_weight_gives_nan() {
        let est = sum_to_emission(
            &month(vec![3.0], vec![1e-6], vec![0.0]),
            &EmissionSumConfig::default(),
        )
        .unwrap();
        assert!(est.q.is_nan());
        assert!(sum_to_emission(
            &month(vec![3.0], vec![1e-6], vec![1.0]),
            &EmissionSumConfig {
                tau: 0.0,
                ..EmissionSumConfig::default()
            }
        )
        .is_err());
    }
}
