//! Command-line parsing for the `ime` inversion tool.
//!
//! Parsing and dispatch are kept apart from the estimators: every flag lands
//! in one of the solver configuration structs (see `app::pipeline`).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::basin::Molecule;
use crate::domain::FitMethod;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "ime",
    version,
    about = "Emission rate and lifetime inversion from integrated mass enhancement"
)]
pub struct Cli {
    /// Log level spec (e.g. `info`, `warn`, `ime_inversion=debug`); falls back to `IME_LOG`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate synthetic monthly observations from the forward model and write them as CSV.
    Simulate(SimulateArgs),
    /// Fit each month of a CSV independently.
    Fit(FitArgs),
    /// Fit all months of a CSV jointly, tied by a month-correlated prior.
    Joint(JointArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output CSV path.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    /// First month (YYYY-MM).
    #[arg(long, default_value = "2019-06")]
    pub month: String,

    /// Number of consecutive months.
    #[arg(long, default_value_t = 1)]
    pub months: usize,

    /// True emission rate (mol/s).
    #[arg(long, default_value_t = 500.0)]
    pub q: f64,

    /// True lifetime (s).
    #[arg(long, default_value_t = 10800.0)]
    pub tau: f64,

    /// Basin length scale (m).
    #[arg(long, default_value_t = 50_000.0)]
    pub length_scale: f64,

    /// Samples per month.
    #[arg(short = 'n', long, default_value_t = 40)]
    pub samples: usize,

    #[arg(long, default_value_t = 1.0)]
    pub ws_min: f64,

    #[arg(long, default_value_t = 10.0)]
    pub ws_max: f64,

    /// Standard deviation of the multiplicative log-noise.
    #[arg(long, default_value_t = 0.05)]
    pub noise: f64,

    #[arg(long, default_value_t = 0.0)]
    pub outlier_prob: f64,

    #[arg(long, default_value_t = 2.0)]
    pub outlier_factor: f64,

    /// Uniform background enhancement; omitted by default.
    #[arg(long)]
    pub background: Option<f64>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Input and output options shared by `fit` and `joint`.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Monthly observation CSV (`month,ws,c[,d,b,f,omega_bg]`).
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    /// Basin length scale (m).
    #[arg(short = 'L', long)]
    pub length_scale: f64,

    /// Solver settings JSON; command-line flags override it.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Write the results to a JSON file.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,

    /// Basin name, used in reports.
    #[arg(long)]
    pub basin: Option<String>,

    #[arg(long, default_value = "TROPOMI")]
    pub satellite: String,

    /// Trace species (NO2, NH3, ...); known species also report kg/s.
    #[arg(long, default_value = "NO2")]
    pub molecule: Molecule,

    /// Lower wind-speed bound (m/s).
    #[arg(long)]
    pub ws_min: Option<f64>,

    /// Upper wind-speed bound (m/s).
    #[arg(long)]
    pub ws_max: Option<f64>,

    /// Prior scaling factor.
    #[arg(long)]
    pub ridge: Option<f64>,

    #[arg(long)]
    pub max_iterations: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[arg(long, value_enum, default_value_t = FitMethod::Oe)]
    pub method: FitMethod,

    /// Only fit this month (YYYY-MM).
    #[arg(long)]
    pub month: Option<String>,

    /// Initial guess / prior Q (mol/s).
    #[arg(long)]
    pub q0: Option<f64>,

    /// Initial guess / prior tau (s); the fixed lifetime for `--method sum`.
    #[arg(long)]
    pub tau0: Option<f64>,

    /// Residual threshold of the two-pass fit (fraction of the prediction).
    #[arg(long)]
    pub residual_threshold: Option<f64>,

    /// Include the background column in the two-pass fit.
    #[arg(long)]
    pub use_background: bool,

    /// `--method sum`: drop the wind-speed ventilation term.
    #[arg(long)]
    pub no_wind: bool,
}

#[derive(Debug, Args, Clone)]
pub struct JointArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Prior Q for every month (mol/s).
    #[arg(long, default_value_t = 500.0)]
    pub prior_q: f64,

    /// Prior tau for every month (s).
    #[arg(long, default_value_t = 10800.0)]
    pub prior_tau: f64,

    #[arg(long, default_value_t = 300.0)]
    pub prior_sd_q: f64,

    #[arg(long, default_value_t = 7200.0)]
    pub prior_sd_tau: f64,

    /// Prior correlation between Q and tau.
    #[arg(long, default_value_t = 0.2)]
    pub prior_rho: f64,

    /// Month-distance decay scale of the prior correlation (months).
    #[arg(long, default_value_t = 1.0)]
    pub corr_scale: f64,

    /// Use the dsigma-square stopping rule with this threshold.
    #[arg(long)]
    pub threshold: Option<f64>,
}
