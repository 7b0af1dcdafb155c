//! Row types of the persisted scorecard and predictions tables.

use serde::{Deserialize, Serialize};

/// One airport's line on the scorecard. Numeric fields carry one decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardEntry {
    #[serde(rename = "Airport")]
    pub airport: String,
    #[serde(rename = "Score")]
    pub score: f64,
    #[serde(rename = "Avg_Delay")]
    pub avg_delay: f64,
    #[serde(rename = "Delay_Rate")]
    pub delay_rate: f64,
    #[serde(rename = "OnTime_Rate")]
    pub on_time_rate: f64,
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "Precision")]
    pub precision: f64,
    #[serde(rename = "Recall")]
    pub recall: f64,
    #[serde(rename = "Flights")]
    pub flights: usize,
}

/// One validation flight with its true and predicted targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    #[serde(rename = "Airport")]
    pub airport: String,
    #[serde(rename = "True_Significant_Delay")]
    pub true_significant_delay: u8,
    #[serde(rename = "Pred_Significant_Delay_Prob")]
    pub pred_significant_delay_prob: f64,
    #[serde(rename = "True_Total_Delay")]
    pub true_total_delay: f64,
    #[serde(rename = "Pred_Total_Delay")]
    pub pred_total_delay: f64,
}

/// Headline figures across the whole scorecard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorecardSummary {
    pub best_airport: String,
    pub best_score: f64,
    pub worst_airport: String,
    pub worst_score: f64,
    pub avg_delay: f64,
    pub avg_score: f64,
    pub total_airports: usize,
}
