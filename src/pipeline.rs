//! End-to-end training run: load, label, engineer, train, evaluate, score and
//! persist.
//!
//! Nothing is written to the output directory until every stage has
//! succeeded.

use crate::airports::AirportCodeMapper;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::evaluation::evaluate;
use crate::features::{FEATURE_COUNT, FeatureEngineer};
use crate::loader::load_data;
use crate::model::{DelayModel, METADATA_FILE, MODEL_FILE, ModelMetadata, TrainingHistory};
use crate::output::{
    PREDICTIONS_FILE, RunSummary, SCORECARD_FILE, SUMMARY_FILE, write_predictions,
    write_scorecard, write_summary,
};
use crate::preprocess::preprocess;
use crate::scorecard::{ScorecardEntry, ValidationOutcome, build_scorecard, prediction_rows};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub flights_analysed: usize,
    pub flights_in_model: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub auc: f64,
    pub mae: f64,
    pub history: TrainingHistory,
    pub scorecard: Vec<ScorecardEntry>,
}

/// Runs the whole training pipeline over `data_dir` and writes the model,
/// metadata, scorecard, predictions and summary into `output_dir`.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.as_ref().display()))]
pub fn run_training<P: AsRef<Path>, Q: AsRef<Path>>(
    data_dir: P,
    output_dir: Q,
    config: &PipelineConfig,
    stop: &AtomicBool,
) -> Result<TrainingReport> {
    let output_dir = output_dir.as_ref();

    let mut tables = load_data(data_dir, config.row_limit)?;
    let flights_analysed = tables.flights.len();
    let airline_names: HashMap<String, String> = tables
        .airline_names()
        .into_iter()
        .map(|(code, name)| (code.to_string(), name.to_string()))
        .collect();
    let mapper = AirportCodeMapper::new(&tables.airports, std::mem::take(&mut tables.airport_ids));

    let labelled = preprocess(std::mem::take(&mut tables.flights));
    let dataset = FeatureEngineer::new(&mapper).engineer(&labelled)?;
    let flights_in_model = dataset.samples.len();

    let (train, val) = dataset.samples.split(config.split_fraction);
    if train.is_empty() || val.is_empty() {
        return Err(PipelineError::EmptyDataset {
            stage: "train/validation split",
        });
    }
    info!(
        train_rows = train.len(),
        validation_rows = val.len(),
        "Split engineered rows"
    );

    let mut model = DelayModel::new(FEATURE_COUNT, &config.training);
    let history = model.train(
        train.features.view(),
        train.significant.view(),
        train.total_delay.view(),
        &config.training,
        stop,
    )?;

    let evaluation = evaluate(
        &model,
        val.features.view(),
        val.significant.view(),
        val.total_delay.view(),
    )?;

    let outcome = ValidationOutcome {
        airports: &val.airports,
        true_significant: val.significant.view(),
        predicted_probability: evaluation.probabilities.view(),
        true_delay: val.total_delay.view(),
        predicted_delay: evaluation.delays.view(),
    };
    let scorecard = build_scorecard(&outcome, config.min_airport_flights);
    let predictions = prediction_rows(&outcome);

    let metadata = ModelMetadata {
        airline_mapping: dataset.encoder.clone(),
        input_dim: FEATURE_COUNT,
    };
    let airlines = dataset
        .encoder
        .codes()
        .into_iter()
        .map(|code| (code.to_string(), airline_names.get(code).cloned()))
        .collect();

    model.save(output_dir.join(MODEL_FILE))?;
    metadata.save(output_dir.join(METADATA_FILE))?;
    write_scorecard(output_dir.join(SCORECARD_FILE), &scorecard)?;
    write_predictions(output_dir.join(PREDICTIONS_FILE), &predictions)?;
    write_summary(
        output_dir.join(SUMMARY_FILE),
        &RunSummary {
            generated_at: Utc::now(),
            flights_analysed,
            flights_in_model,
            auc: evaluation.auc,
            mae: evaluation.mae,
            scorecard: &scorecard,
            airlines,
        },
    )?;

    info!(
        airports = scorecard.len(),
        output_dir = %output_dir.display(),
        "Training run complete"
    );

    Ok(TrainingReport {
        flights_analysed,
        flights_in_model,
        train_rows: train.len(),
        validation_rows: val.len(),
        auc: evaluation.auc,
        mae: evaluation.mae,
        history,
        scorecard,
    })
}
