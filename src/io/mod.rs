//! Input/output helpers.
//!
//! - CSV ingest of monthly observations (`ingest`)
//! - CSV/JSON exports (`export`)
//! - solver settings file (`config`)

pub mod config;
pub mod export;
pub mod ingest;

pub use config::*;
pub use export::*;
pub use ingest::*;
