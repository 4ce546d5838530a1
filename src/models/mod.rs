//! Physical forward model of integrated mass enhancement.
//!
//! Models are implemented as small, pure functions so that the solvers can stay
//! generic over single-month and pooled multi-month state vectors.

pub mod forward;

pub use forward::*;
