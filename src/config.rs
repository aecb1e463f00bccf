use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunable constants for parsing and normalization. Every field has a
/// default so a partial JSON file is enough to override one value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub coverage_threshold: f64,
    pub classifier_window: usize,
    pub declared_voltage_confidence: f64,
    pub derived_voltage_confidence: f64,
    pub voltage_derivation_divisor: f64,
    pub default_frequency_hz: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.95,
            classifier_window: 200,
            declared_voltage_confidence: 1.0,
            derived_voltage_confidence: 0.6,
            voltage_derivation_divisor: 1000.0,
            default_frequency_hz: 60.0,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }
}
