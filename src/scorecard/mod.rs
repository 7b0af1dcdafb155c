//! Per-airport scorecard built from validation predictions.
//!
//! Flights are grouped by origin airport, small airports are dropped, and
//! each remaining airport gets delay, on-time and prediction-quality figures
//! plus a composite score used for ranking.

pub mod aggregate;
pub mod types;
pub mod utility;

pub use aggregate::{ValidationOutcome, build_scorecard, prediction_rows, summarize};
pub use types::{PredictionRow, ScorecardEntry, ScorecardSummary};
