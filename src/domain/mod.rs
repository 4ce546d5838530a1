//! Domain types used throughout the inversion.
//!
//! This module defines:
//!
//! - the validated monthly observation record (`MonthlyObservation`)
//! - solver configuration (`OeConfig`, `MultiMonthConfig`, `CurveFitConfig`, `EmissionSumConfig`)
//! - fit outputs (`OeFit`, `MultiMonthFit`, `TwoPassFit`, `EmissionEstimate`)

pub mod types;

pub use types::*;
