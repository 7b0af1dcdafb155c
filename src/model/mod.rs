//! Two-head multi-task delay network.
//!
//! A shared ReLU trunk feeds a sigmoid head (probability of a significant
//! delay) and a linear head (delay minutes). The network is trained jointly
//! on a weighted sum of binary cross-entropy and mean absolute error, and
//! persisted as a self-describing JSON artifact next to the metadata the
//! predictor needs to rebuild feature rows.

pub mod artifact;
pub mod network;
pub mod train;

pub use artifact::{METADATA_FILE, MODEL_FILE, ModelMetadata};
pub use network::{Architecture, DelayModel, Dense, Predictions};
pub use train::TrainingHistory;
