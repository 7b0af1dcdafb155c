//! Error taxonomy shared by the training pipeline and the predictor.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source table needed for training is absent.
    #[error("input file not found: {}", path.display())]
    MissingInputFile { path: PathBuf },

    /// A trained artifact is absent; the model has not been trained yet.
    #[error("model not trained yet: {} is missing", path.display())]
    MissingArtifact { path: PathBuf },

    /// Validation labels contain a single class, so ranking metrics are undefined.
    #[error("validation labels contain only class {class}; AUC is undefined")]
    DegenerateLabel { class: u8 },

    #[error("malformed request field {field}: {value:?}")]
    MalformedRequest { field: &'static str, value: String },

    #[error("feature width mismatch: expected {expected}, found {found}")]
    Shape { expected: usize, found: usize },

    #[error("no usable rows left after {stage}")]
    EmptyDataset { stage: &'static str },

    #[error("training interrupted after epoch {epoch}")]
    Interrupted { epoch: usize },

    #[error("failed to load artifact {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Errors a caller can expect to clear up by retrying later
    /// (for example once a training run has produced the artifacts).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::MissingArtifact { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact_is_recoverable() {
        let err = PipelineError::MissingArtifact {
            path: PathBuf::from("output/metadata.json"),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("not trained yet"));
    }

    #[test]
    fn test_degenerate_label_is_not_recoverable() {
        let err = PipelineError::DegenerateLabel { class: 0 };
        assert!(!err.is_recoverable());
    }
}
