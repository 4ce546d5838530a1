//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and starts logging
//! - parses CLI arguments into solver settings
//! - runs the requested estimator(s)
//! - prints reports and writes optional exports

use chrono::NaiveDate;
use clap::Parser;

use crate::basin::BasinSetup;
use crate::cli::{Command, FitArgs, InputArgs, JointArgs, SimulateArgs};
use crate::data::SimulationConfig;
use crate::domain::{FitMethod, WindRange};
use crate::error::AppError;
use crate::io::config::{SolverSettings, load_settings};
use crate::io::export::write_json;
use crate::io::ingest::load_months;
use crate::logging::{LogFacade, setup_logging};
use crate::report;

pub mod pipeline;

/// Environment variable holding the default log level spec.
pub const LOG_ENV: &str = "IME_LOG";

/// Entry point for the `ime` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = crate::cli::Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var(LOG_ENV).ok())
        .unwrap_or_else(|| "info".to_string());
    let _logger = setup_logging(&level)?;

    match cli.command {
        Command::Simulate(args) => handle_simulate(args),
        Command::Fit(args) => handle_fit(args),
        Command::Joint(args) => handle_joint(args),
    }
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = simulation_config_from_args(&args)?;
    let months = pipeline::simulate_to_csv(&config, args.months, &args.out)?;
    let outliers: usize = months.iter().map(|m| m.outliers.len()).sum();
    println!(
        "Wrote {} month(s), {} samples each ({} outliers) to {}",
        months.len(),
        config.n_samples,
        outliers,
        args.out.display()
    );
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let settings = fit_settings_from_args(&args)?;
    let data = load_months(&args.input.csv, args.input.length_scale)?;
    print!("{}", report::format_ingest_summary(&data));

    let months = match &args.month {
        Some(m) => {
            let wanted = parse_month_arg(m)?;
            let picked: Vec<_> = data.months.into_iter().filter(|o| o.month() == wanted).collect();
            if picked.is_empty() {
                return Err(AppError::new(3, format!("Month {m} not found in the CSV.")));
            }
            picked
        }
        None => data.months,
    };

    let basin = basin_from_args(&args.input);
    let results = pipeline::fit_months(&months, args.method, &settings, LogFacade)?;
    for r in &results {
        let label = r.month.format("%Y-%m").to_string();
        let text = match &r.outcome {
            pipeline::MonthOutcome::Oe(fit) => report::format_oe_summary(&label, fit, basin.as_ref()),
            pipeline::MonthOutcome::Curve(fit) => report::format_two_pass_summary(&label, fit, basin.as_ref()),
            pipeline::MonthOutcome::Sum(est) => report::format_emission_summary(&label, est, basin.as_ref()),
        };
        println!("{text}");
    }

    if let Some(path) = &args.input.export {
        write_json(path, &results)?;
    }
    Ok(())
}

fn handle_joint(args: JointArgs) -> Result<(), AppError> {
    let settings = joint_settings_from_args(&args)?;
    let data = load_months(&args.input.csv, args.input.length_scale)?;
    print!("{}", report::format_ingest_summary(&data));

    let spec = pipeline::JointPriorSpec {
        q: args.prior_q,
        tau: args.prior_tau,
        sd_q: args.prior_sd_q,
        sd_tau: args.prior_sd_tau,
        rho: args.prior_rho,
        corr_scale: args.corr_scale,
    };
    let fit = pipeline::fit_joint(&data.months, &spec, &settings, LogFacade)?;
    let basin = basin_from_args(&args.input);
    println!("{}", report::format_joint_summary(&fit, basin.as_ref()));

    if let Some(path) = &args.input.export {
        write_json(path, &fit)?;
    }
    Ok(())
}

/// Settings file (if any) plus the overrides shared by `fit` and `joint`.
fn base_settings(input: &InputArgs) -> Result<SolverSettings, AppError> {
    let mut s = match &input.config {
        Some(path) => load_settings(path)?,
        None => SolverSettings::default(),
    };
    let window = |current: WindRange| {
        WindRange::new(
            input.ws_min.unwrap_or(current.low),
            input.ws_max.unwrap_or(current.high),
        )
    };
    s.oe.ws_range = window(s.oe.ws_range);
    s.joint.ws_range = window(s.joint.ws_range);
    s.curve.ws_range = window(s.curve.ws_range);
    s.sum.ws_range = window(s.sum.ws_range);
    if let Some(ridge) = input.ridge {
        s.oe.ridge = ridge;
        s.joint.ridge = ridge;
    }
    if let Some(n) = input.max_iterations {
        s.oe.max_iterations = n;
        s.joint.max_iterations = n;
    }
    Ok(s)
}

pub fn fit_settings_from_args(args: &FitArgs) -> Result<SolverSettings, AppError> {
    let mut s = base_settings(&args.input)?;
    if let Some(q0) = args.q0 {
        s.oe.initial_guess.0 = q0;
        s.curve.initial_guess.0 = q0;
    }
    if let Some(tau0) = args.tau0 {
        s.oe.initial_guess.1 = tau0;
        s.curve.initial_guess.1 = tau0;
        s.sum.tau = tau0;
    }
    if let Some(threshold) = args.residual_threshold {
        s.curve.residual_threshold = threshold;
    }
    if args.use_background {
        s.curve.use_background = true;
    }
    if args.no_wind {
        s.sum.use_wind_speed = false;
    }
    validate_for(&s, Some(args.method))?;
    Ok(s)
}

pub fn joint_settings_from_args(args: &JointArgs) -> Result<SolverSettings, AppError> {
    let mut s = base_settings(&args.input)?;
    if let Some(threshold) = args.threshold {
        s.joint.convergence_threshold = threshold;
    }
    validate_for(&s, None)?;
    Ok(s)
}

/// Validate the block the command will use (`None` = joint).
fn validate_for(s: &SolverSettings, method: Option<FitMethod>) -> Result<(), AppError> {
    match method {
        Some(FitMethod::Oe) => s.oe.validate()?,
        Some(FitMethod::Curve) => s.curve.validate()?,
        Some(FitMethod::Sum) => s.sum.validate()?,
        None => s.joint.validate()?,
    }
    Ok(())
}

pub fn simulation_config_from_args(args: &SimulateArgs) -> Result<SimulationConfig, AppError> {
    Ok(SimulationConfig {
        month: parse_month_arg(&args.month)?,
        q: args.q,
        tau: args.tau,
        length_scale: args.length_scale,
        n_samples: args.samples,
        ws_range: WindRange::new(args.ws_min, args.ws_max),
        noise_sd: args.noise,
        outlier_prob: args.outlier_prob,
        outlier_factor: args.outlier_factor,
        background: args.background,
        seed: args.seed,
        ..SimulationConfig::default()
    })
}

fn basin_from_args(input: &InputArgs) -> Option<BasinSetup> {
    let name = input.basin.as_ref()?;
    Some(BasinSetup::new(
        name.as_str(),
        input.satellite.as_str(),
        vec![input.molecule.clone()],
        Vec::new(),
        &LogFacade,
    ))
}

/// `YYYY-MM` to the first day of that month.
fn parse_month_arg(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
        .map_err(|_| AppError::new(2, format!("Invalid month '{s}'. Expected YYYY-MM.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    #[test]
    fn fit_flags_override_settings() {
        let cli = Cli::parse_from([
            "ime", "fit", "--csv", "x.csv", "-L", "5e4", "--method", "sum", "--tau0", "7200",
            "--no-wind", "--ws-max", "12",
        ]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let s = fit_settings_from_args(&args).unwrap();
        assert_eq!(s.sum.tau, 7200.0);
        assert!(!s.sum.use_wind_speed);
        assert_eq!(s.sum.ws_range, WindRange::new(0.0, 12.0));
        assert_eq!(s.oe.ws_range, WindRange::new(2.0, 12.0));
        assert_eq!(s.oe.initial_guess, (500.0, 7200.0));
    }

    #[test]
    fn joint_threshold_needs_ridge() {
        let cli = Cli::parse_from([
            "ime", "joint", "--csv", "x.csv", "-L", "5e4", "--threshold", "0.1", "--ridge", "0",
        ]);
        let Command::Joint(args) = cli.command else {
            panic!("expected joint");
        };
        assert_eq!(joint_settings_from_args(&args).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn simulate_month_argument() {
        assert_eq!(
            parse_month_arg("2020-02").unwrap(),
            NaiveDate::from_ymd_opt(2020, 2, 1).unwrap()
        );
        assert!(parse_month_arg("2020-13").is_err());
    }
}
