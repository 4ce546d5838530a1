//! Emission and lifetime estimators.
//!
//! - `oe`: single-month optimal estimation
//! - `multi`: joint optimal estimation over several months
//! - `robust`: two-pass least-squares curve fit with outlier rejection
//! - `aggregate`: closed-form weighted emission at a fixed lifetime

pub mod aggregate;
mod gauss_newton;
pub mod mask;
pub mod multi;
pub mod oe;
pub mod robust;

pub use aggregate::*;
pub use mask::*;
pub use multi::*;
pub use oe::*;
pub use robust::*;
