use std::path::PathBuf;

use chrono::NaiveDate;
use ime_inversion::app::pipeline::{JointPriorSpec, MonthOutcome, fit_joint, fit_months, simulate_to_csv};
use ime_inversion::data::SimulationConfig;
use ime_inversion::domain::{FitMethod, PassStatus, WindRange};
use ime_inversion::io::config::SolverSettings;
use ime_inversion::io::export::write_json;
use ime_inversion::io::ingest::load_months;
use ime_inversion::logging::SilentLogger;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ime-inversion-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn simulate_ingest_fit_export() {
    let dir = scratch("fit");
    let csv = dir.join("months.csv");
    let config = SimulationConfig {
        month: NaiveDate::from_ymd_opt(2019, 5, 1).unwrap(),
        q: 600.0,
        tau: 9000.0,
        n_samples: 60,
        ws_range: WindRange::new(2.0, 8.0),
        noise_sd: 0.01,
        outlier_prob: 0.05,
        outlier_factor: 2.5,
        seed: 11,
        ..SimulationConfig::default()
    };
    let simulated = simulate_to_csv(&config, 2, &csv).unwrap();
    assert_eq!(simulated.len(), 2);

    let data = load_months(&csv, config.length_scale).unwrap();
    assert_eq!(data.months.len(), 2);
    assert_eq!(data.rows_used, 120);
    assert!(data.row_errors.is_empty());
    assert_eq!(data.months[1].month(), NaiveDate::from_ymd_opt(2019, 6, 1).unwrap());
    assert_eq!(data.months[0].c(), simulated[0].observation.c());

    let results = fit_months(&data.months, FitMethod::Curve, &SolverSettings::default(), SilentLogger).unwrap();
    for (r, sim) in results.iter().zip(&simulated) {
        let MonthOutcome::Curve(fit) = &r.outcome else {
            panic!("expected a curve fit");
        };
        // Every injected outlier is off by a factor of 2.5, far beyond the 20% threshold.
        assert_eq!(fit.rejected.len(), sim.outliers.len());
        if !sim.outliers.is_empty() {
            assert_eq!(fit.second.status, PassStatus::Fitted);
        }
        assert!((fit.second.q() / 600.0 - 1.0).abs() < 0.05, "q = {}", fit.second.q());
        assert!((fit.second.tau() / 9000.0 - 1.0).abs() < 0.1, "tau = {}", fit.second.tau());
    }

    let json = dir.join("results.json");
    write_json(&json, &results).unwrap();
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
    let first = &value.as_array().unwrap()[0];
    assert_eq!(first["month"], "2019-05-01");
    assert_eq!(first["outcome"]["method"], "curve");
    assert!(first["outcome"]["second"]["params"].is_array());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn joint_fit_from_csv() {
    let dir = scratch("joint");
    let csv = dir.join("months.csv");
    let config = SimulationConfig {
        month: NaiveDate::from_ymd_opt(2020, 11, 1).unwrap(),
        n_samples: 30,
        noise_sd: 0.0,
        ..SimulationConfig::default()
    };
    simulate_to_csv(&config, 3, &csv).unwrap();
    let data = load_months(&csv, config.length_scale).unwrap();

    let spec = JointPriorSpec {
        q: 450.0,
        tau: 12000.0,
        sd_q: 300.0,
        sd_tau: 7200.0,
        rho: 0.2,
        corr_scale: 2.0,
    };
    let mut settings = SolverSettings::default();
    settings.joint.ridge = 1e-20;
    let fit = fit_joint(&data.months, &spec, &settings, SilentLogger).unwrap();
    assert!(fit.status.is_success());
    assert_eq!(fit.months.len(), 3);
    assert_eq!(fit.months[2], NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
    for (q, tau) in fit.q.iter().zip(&fit.tau) {
        assert!((q / 500.0 - 1.0).abs() < 1e-4, "q = {q}");
        assert!((tau / 10800.0 - 1.0).abs() < 1e-4, "tau = {tau}");
    }

    std::fs::remove_dir_all(&dir).ok();
}
