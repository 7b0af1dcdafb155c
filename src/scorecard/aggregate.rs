use crate::scorecard::types::{PredictionRow, ScorecardEntry, ScorecardSummary};
use crate::scorecard::utility::{mean, ratio, round1};
use ndarray::ArrayView1;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Airports with fewer validation flights than this are left off the scorecard.
pub const MIN_AIRPORT_FLIGHTS: usize = 10;
/// Predicted probabilities above this count as a predicted significant delay.
pub const DECISION_THRESHOLD: f64 = 0.5;
/// True delays at or under this many minutes count as on time.
pub const ON_TIME_MINUTES: f64 = 15.0;

// Composite score weights. They sum to 1, keeping the score in `[0, 100]`.
pub const MAE_WEIGHT: f64 = 0.3;
pub const PRECISION_WEIGHT: f64 = 0.2;
pub const RECALL_WEIGHT: f64 = 0.2;
pub const ON_TIME_WEIGHT: f64 = 0.3;

/// Validation-set truth and model output, one entry per flight.
#[derive(Debug, Clone, Copy)]
pub struct ValidationOutcome<'a> {
    pub airports: &'a [String],
    pub true_significant: ArrayView1<'a, f64>,
    pub predicted_probability: ArrayView1<'a, f64>,
    pub true_delay: ArrayView1<'a, f64>,
    pub predicted_delay: ArrayView1<'a, f64>,
}

/// Composite ranking score from unrounded per-airport metrics.
///
/// `precision`, `recall` are fractions in `[0, 1]`; `on_time_rate` is a
/// percentage.
pub fn composite_score(mae: f64, precision: f64, recall: f64, on_time_rate: f64) -> f64 {
    let mae_score = (100.0 - mae * 2.0).max(0.0);
    MAE_WEIGHT * mae_score
        + PRECISION_WEIGHT * precision * 100.0
        + RECALL_WEIGHT * recall * 100.0
        + ON_TIME_WEIGHT * on_time_rate
}

/// Builds the per-airport scorecard, best score first.
///
/// Airports are visited in sorted order and the ranking sort is stable, so
/// equal scores keep alphabetical order.
pub fn build_scorecard(outcome: &ValidationOutcome, min_flights: usize) -> Vec<ScorecardEntry> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, airport) in outcome.airports.iter().enumerate() {
        groups.entry(airport.as_str()).or_default().push(i);
    }

    let mut entries = Vec::new();

    for (airport, rows) in groups {
        if rows.len() < min_flights {
            debug!(airport, flights = rows.len(), "Skipping airport below flight threshold");
            continue;
        }

        let mut tp = 0usize;
        let mut fn_ = 0usize;
        let mut fp = 0usize;
        let mut on_time = 0usize;
        let mut abs_errors = Vec::with_capacity(rows.len());
        let mut delays = Vec::with_capacity(rows.len());
        let mut significant = Vec::with_capacity(rows.len());

        for &i in &rows {
            let actual = outcome.true_significant[i] > 0.5;
            let predicted = outcome.predicted_probability[i] > DECISION_THRESHOLD;
            match (predicted, actual) {
                (true, true) => tp += 1,
                (false, true) => fn_ += 1,
                (true, false) => fp += 1,
                (false, false) => {}
            }

            let delay = outcome.true_delay[i];
            if delay <= ON_TIME_MINUTES {
                on_time += 1;
            }
            abs_errors.push((delay - outcome.predicted_delay[i]).abs());
            delays.push(delay);
            significant.push(outcome.true_significant[i]);
        }

        let recall = ratio(tp, tp + fn_);
        let precision = ratio(tp, tp + fp);
        let mae = mean(&abs_errors);
        let avg_delay = mean(&delays);
        let delay_rate = mean(&significant) * 100.0;
        let on_time_rate = ratio(on_time, rows.len()) * 100.0;
        let score = composite_score(mae, precision, recall, on_time_rate);

        entries.push(ScorecardEntry {
            airport: airport.to_string(),
            score: round1(score),
            avg_delay: round1(avg_delay),
            delay_rate: round1(delay_rate),
            on_time_rate: round1(on_time_rate),
            mae: round1(mae),
            precision: round1(precision * 100.0),
            recall: round1(recall * 100.0),
            flights: rows.len(),
        });
    }

    entries.sort_by(|a, b| b.score.total_cmp(&a.score));

    info!(airports = entries.len(), "Built airport scorecard");
    entries
}

/// Per-flight table of true and predicted targets.
pub fn prediction_rows(outcome: &ValidationOutcome) -> Vec<PredictionRow> {
    outcome
        .airports
        .iter()
        .enumerate()
        .map(|(i, airport)| PredictionRow {
            airport: airport.clone(),
            true_significant_delay: u8::from(outcome.true_significant[i] > 0.5),
            pred_significant_delay_prob: outcome.predicted_probability[i],
            true_total_delay: outcome.true_delay[i],
            pred_total_delay: outcome.predicted_delay[i],
        })
        .collect()
}

/// Best, worst and average figures of a ranked scorecard; `None` when empty.
pub fn summarize(entries: &[ScorecardEntry]) -> Option<ScorecardSummary> {
    let best = entries.first()?;
    let worst = entries.last()?;
    let scores: Vec<f64> = entries.iter().map(|e| e.score).collect();
    let delays: Vec<f64> = entries.iter().map(|e| e.avg_delay).collect();

    Some(ScorecardSummary {
        best_airport: best.airport.clone(),
        best_score: best.score,
        worst_airport: worst.airport.clone(),
        worst_score: worst.score,
        avg_delay: mean(&delays),
        avg_score: mean(&scores),
        total_airports: entries.len(),
    })
}
