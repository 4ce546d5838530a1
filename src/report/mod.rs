//! Reporting utilities: residual tables and run summaries.

pub mod format;

pub use format::*;
