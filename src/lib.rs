//! `ime-inversion` library crate.
//!
//! Emission rate (Q) and chemical lifetime (tau) of a trace gas over a basin,
//! inverted from monthly integrated-mass-enhancement (IME) samples binned by
//! wind speed. The binary (`ime`) is a thin wrapper around this library so
//! that:
//!
//! - the estimators are testable without spawning processes
//! - they can be driven from other tools with their own logger

pub mod app;
pub mod basin;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod report;
