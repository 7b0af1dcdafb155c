//! On-disk model and metadata artifacts.

use super::network::DelayModel;
use crate::error::{PipelineError, Result};
use crate::features::AirlineEncoder;
use crate::output::write_atomic;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::info;

pub const MODEL_FILE: &str = "flight_delay_model.json";
pub const METADATA_FILE: &str = "metadata.json";

const MODEL_FORMAT: &str = "flight-delay-mlp/1";

#[derive(Serialize)]
struct ModelArtifactRef<'a> {
    format: &'static str,
    model: &'a DelayModel,
}

#[derive(Deserialize)]
struct ModelArtifact {
    format: String,
    model: DelayModel,
}

/// Everything besides the weights that inference needs to rebuild rows the
/// way training did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub airline_mapping: AirlineEncoder,
    pub input_dim: usize,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(PipelineError::MissingArtifact {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| PipelineError::CorruptArtifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

impl DelayModel {
    /// Writes the architecture and weights as JSON, replacing `path` atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec(&ModelArtifactRef {
            format: MODEL_FORMAT,
            model: self,
        })?;
        write_atomic(path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "Saved model");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let artifact: ModelArtifact = read_json(path)?;

        if artifact.format != MODEL_FORMAT {
            return Err(PipelineError::CorruptArtifact {
                path: path.to_path_buf(),
                reason: format!("unsupported model format {:?}", artifact.format),
            });
        }
        artifact
            .model
            .check_consistency()
            .map_err(|reason| PipelineError::CorruptArtifact {
                path: path.to_path_buf(),
                reason,
            })?;

        Ok(artifact.model)
    }
}

impl ModelMetadata {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)?;
        info!(path = %path.display(), airlines = self.airline_mapping.len(), "Saved metadata");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }
}
