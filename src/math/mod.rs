//! Numerical helpers: dense linear algebra, Levenberg-Marquardt and month correlation.

pub mod linalg;
pub mod lm;
pub mod month;

pub use linalg::*;
pub use lm::*;
pub use month::*;
