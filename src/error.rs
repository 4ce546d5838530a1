//! Error types.
//!
//! Two layers:
//! - `ObservationError`: construction-time validation of records and solver
//!   configuration (library level, raised before any solver runs)
//! - `AppError`: what the `ime` binary reports, carrying a process exit code
//!
//! Numeric failures inside a solver never surface here; they are reported on
//! the fit result as a tagged status.

/// Validation failures for observation records and solver configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ObservationError {
    #[error("field `{field}` has {actual} samples, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("basin length scale must be finite and > 0, got {0}")]
    InvalidLengthScale(f64),

    #[error("shape factor must be finite and > 0, got {value} at sample {index}")]
    InvalidShapeFactor { index: usize, value: f64 },

    #[error("wind-speed range [{low}, {high}] is invalid")]
    InvalidWindRange { low: f64, high: f64 },

    #[error("month ranges cover {covered} samples but {total} were supplied")]
    RangeCoverage { covered: usize, total: usize },

    #[error("invalid prior: {0}")]
    InvalidPrior(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<ObservationError> for AppError {
    fn from(err: ObservationError) -> Self {
        AppError::new(2, err.to_string())
    }
}
