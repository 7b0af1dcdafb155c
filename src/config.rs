//! Pipeline configuration.
//!
//! Every field has a default, so a config file only needs to name the
//! values it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hyper-parameters for the multi-task network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Epochs without validation improvement before training stops.
    pub patience: usize,
    /// Tail fraction of the training partition held out for early stopping.
    pub validation_split: f64,
    pub hidden_units: [usize; 2],
    pub dropout: f64,
    pub classification_weight: f64,
    pub regression_weight: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 256,
            learning_rate: 0.001,
            patience: 5,
            validation_split: 0.2,
            hidden_units: [64, 32],
            dropout: 0.2,
            classification_weight: 0.7,
            regression_weight: 0.3,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub training: TrainingConfig,
    /// Leading fraction of engineered rows used for training; the rest is
    /// the validation set the scorecard is built from.
    pub split_fraction: f64,
    /// Airports with fewer validation flights are left off the scorecard.
    pub min_airport_flights: usize,
    /// Read only the first N flights when set.
    pub row_limit: Option<usize>,
    pub scorecard_max_age_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            training: TrainingConfig::default(),
            split_fraction: 0.8,
            min_airport_flights: 10,
            row_limit: None,
            scorecard_max_age_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Loads a JSON config file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    /// Loads `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => Ok(Self::default()),
        }
    }
}
