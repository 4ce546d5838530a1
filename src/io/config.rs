//! Solver settings file (`--config <json>`).
//!
//! Every block is optional; missing blocks and fields keep their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{CurveFitConfig, EmissionSumConfig, MultiMonthConfig, OeConfig};
use crate::error::AppError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSettings {
    pub oe: OeConfig,
    pub joint: MultiMonthConfig,
    pub curve: CurveFitConfig,
    pub sum: EmissionSumConfig,
}

impl SolverSettings {
    pub fn from_json(text: &str) -> Result<Self, AppError> {
        let settings: Self = serde_json::from_str(text)
            .map_err(|e| AppError::new(2, format!("Invalid solver settings: {e}")))?;
        settings.oe.validate()?;
        settings.joint.validate()?;
        settings.curve.validate()?;
        settings.sum.validate()?;
        Ok(settings)
    }
}

pub fn load_settings(path: &Path) -> Result<SolverSettings, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read settings '{}': {e}", path.display())))?;
    SolverSettings::from_json(&text)
}
