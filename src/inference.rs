//! Single-flight delay prediction from the persisted model.
//!
//! The predictor starts empty and loads the model and metadata on first use.
//! Loading happens under a write lock, so concurrent callers either see the
//! fully loaded model or wait for the one load in progress.

use crate::airports::AirportDirectory;
use crate::error::{PipelineError, Result};
use crate::features::{AirlineEncoder, FEATURE_COUNT, encode_row};
use crate::geo::haversine_miles;
use crate::model::{DelayModel, METADATA_FILE, MODEL_FILE, ModelMetadata};
use ndarray::arr2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_HOUR: i64 = 12;
pub const DEFAULT_DAY_OF_WEEK: i64 = 1;
pub const DEFAULT_MONTH: i64 = 1;
/// Route length assumed when either endpoint has no known coordinates.
pub const FALLBACK_DISTANCE_MILES: f64 = 1000.0;

const HIGH_RISK_PROBABILITY: f64 = 0.25;
const MEDIUM_RISK_PROBABILITY: f64 = 0.15;
/// Regression outputs below this many minutes are replaced by a
/// probability-scaled estimate.
const MIN_REGRESSION_MINUTES: f64 = 1.0;
const FALLBACK_DELAY_SCALE: f64 = 50.0;

/// A request value that may arrive as a JSON number or as text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl FieldValue {
    fn malformed(&self, field: &'static str) -> PipelineError {
        let value = match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Other(v) => v.to_string(),
        };
        PipelineError::MalformedRequest { field, value }
    }

    /// Upper-cased, trimmed code. Numbers are accepted as their decimal text.
    fn as_code(&self, field: &'static str) -> Result<String> {
        match self {
            FieldValue::Text(s) => Ok(s.trim().to_uppercase()),
            FieldValue::Integer(n) => Ok(n.to_string()),
            _ => Err(self.malformed(field)),
        }
    }

    fn as_integer(&self, field: &'static str) -> Result<i64> {
        match self {
            FieldValue::Integer(n) => Ok(*n),
            FieldValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Ok(*f as i64),
            FieldValue::Text(s) => s.trim().parse().map_err(|_| self.malformed(field)),
            _ => Err(self.malformed(field)),
        }
    }
}

/// Inbound prediction request. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FlightRequest {
    #[serde(rename = "ORIGIN_AIRPORT", default)]
    pub origin_airport: Option<FieldValue>,
    #[serde(rename = "DESTINATION_AIRPORT", default)]
    pub destination_airport: Option<FieldValue>,
    #[serde(rename = "HOUR", default)]
    pub hour: Option<FieldValue>,
    #[serde(rename = "DAY_OF_WEEK", default)]
    pub day_of_week: Option<FieldValue>,
    #[serde(rename = "MONTH", default)]
    pub month: Option<FieldValue>,
    #[serde(rename = "AIRLINE", default)]
    pub airline: Option<FieldValue>,
}

/// A request with defaults applied and every field validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub origin: String,
    pub destination: String,
    pub airline: String,
    pub hour: i64,
    pub day_of_week: i64,
    pub month: i64,
}

fn code_field(value: &Option<FieldValue>, field: &'static str) -> Result<String> {
    value
        .as_ref()
        .map_or(Ok(String::new()), |v| v.as_code(field))
}

fn integer_field(value: &Option<FieldValue>, field: &'static str, default: i64) -> Result<i64> {
    value
        .as_ref()
        .map_or(Ok(default), |v| v.as_integer(field))
}

impl FlightRequest {
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn parse(&self) -> Result<ParsedRequest> {
        Ok(ParsedRequest {
            origin: code_field(&self.origin_airport, "ORIGIN_AIRPORT")?,
            destination: code_field(&self.destination_airport, "DESTINATION_AIRPORT")?,
            airline: code_field(&self.airline, "AIRLINE")?,
            hour: integer_field(&self.hour, "HOUR", DEFAULT_HOUR)?,
            day_of_week: integer_field(&self.day_of_week, "DAY_OF_WEEK", DEFAULT_DAY_OF_WEEK)?,
            month: integer_field(&self.month, "MONTH", DEFAULT_MONTH)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_probability(probability: f64) -> Self {
        if probability > HIGH_RISK_PROBABILITY {
            RiskLevel::High
        } else if probability > MEDIUM_RISK_PROBABILITY {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub probability_percent: f64,
    pub estimated_delay_minutes: f64,
    pub risk_level: RiskLevel,
    pub airline_used: String,
    pub calculated_distance: f64,
    pub route: String,
}

/// JSON body returned to callers: either the prediction or an error message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Prediction(PredictionResult),
    Error { error: String },
}

/// Regression output in minutes, or a probability-scaled stand-in when the
/// regression head predicts less than a minute.
pub fn estimated_delay(probability: f64, raw_delay: f64) -> f64 {
    if raw_delay < MIN_REGRESSION_MINUTES {
        probability * FALLBACK_DELAY_SCALE
    } else {
        raw_delay
    }
}

/// Rounds to one decimal on the exact decimal value of `value`, so `0.35`
/// (stored just below the tie) rounds down.
fn round_response(value: f64) -> f64 {
    format!("{value:.1}").parse().unwrap_or(value)
}

fn route_distance(airports: &AirportDirectory, origin: &str, destination: &str) -> f64 {
    match (airports.coordinate(origin), airports.coordinate(destination)) {
        (Some(a), Some(b)) => haversine_miles(a, b),
        _ => FALLBACK_DISTANCE_MILES,
    }
}

fn feature_row(
    request: &ParsedRequest,
    encoder: &AirlineEncoder,
    distance: f64,
) -> [f64; FEATURE_COUNT] {
    encode_row(
        request.hour,
        request.day_of_week,
        request.month,
        encoder.encode(&request.airline),
        distance,
    )
}

#[derive(Debug)]
struct LoadedModel {
    model: DelayModel,
    metadata: ModelMetadata,
}

#[derive(Debug)]
enum PredictorState {
    Unloaded,
    Loaded(Arc<LoadedModel>),
    Failed(String),
}

/// Externally visible load state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictorStatus {
    Unloaded,
    Loaded,
    Failed(String),
}

pub struct FlightPredictor {
    model_dir: PathBuf,
    airports: Arc<AirportDirectory>,
    state: RwLock<PredictorState>,
}

impl FlightPredictor {
    pub fn new<P: AsRef<Path>>(model_dir: P, airports: Arc<AirportDirectory>) -> Self {
        Self {
            model_dir: model_dir.as_ref().to_path_buf(),
            airports,
            state: RwLock::new(PredictorState::Unloaded),
        }
    }

    pub fn status(&self) -> PredictorStatus {
        match &*self.state.read() {
            PredictorState::Unloaded => PredictorStatus::Unloaded,
            PredictorState::Loaded(_) => PredictorStatus::Loaded,
            PredictorState::Failed(reason) => PredictorStatus::Failed(reason.clone()),
        }
    }

    fn read_artifacts(&self) -> Result<LoadedModel> {
        let metadata = ModelMetadata::load(self.model_dir.join(METADATA_FILE))?;
        let model_path = self.model_dir.join(MODEL_FILE);
        let model = DelayModel::load(&model_path)?;

        if metadata.input_dim != model.input_dim() || model.input_dim() != FEATURE_COUNT {
            return Err(PipelineError::CorruptArtifact {
                path: model_path,
                reason: format!(
                    "metadata expects {} features, model takes {}, rows carry {}",
                    metadata.input_dim,
                    model.input_dim(),
                    FEATURE_COUNT
                ),
            });
        }
        Ok(LoadedModel { model, metadata })
    }

    /// Loads the model and metadata unless already loaded.
    ///
    /// Missing artifacts leave the predictor unloaded and are reported as
    /// [`PipelineError::MissingArtifact`]; any other failure marks it failed.
    pub fn load(&self) -> Result<()> {
        self.ensure_loaded().map(|_| ())
    }

    fn ensure_loaded(&self) -> Result<Arc<LoadedModel>> {
        if let PredictorState::Loaded(loaded) = &*self.state.read() {
            return Ok(Arc::clone(loaded));
        }

        let mut state = self.state.write();
        // another caller may have finished loading while we waited
        if let PredictorState::Loaded(loaded) = &*state {
            return Ok(Arc::clone(loaded));
        }

        match self.read_artifacts() {
            Ok(loaded) => {
                info!(
                    model_dir = %self.model_dir.display(),
                    airlines = loaded.metadata.airline_mapping.len(),
                    airports = self.airports.len(),
                    "Loaded prediction model"
                );
                let loaded = Arc::new(loaded);
                *state = PredictorState::Loaded(Arc::clone(&loaded));
                Ok(loaded)
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Prediction model not available yet");
                *state = PredictorState::Unloaded;
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Failed to load prediction model");
                *state = PredictorState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Predicts delay risk for one flight, loading the model on first use.
    pub fn predict(&self, request: &FlightRequest) -> Result<PredictionResult> {
        let loaded = self.ensure_loaded()?;
        let parsed = request.parse()?;

        let distance = route_distance(&self.airports, &parsed.origin, &parsed.destination);
        let row = feature_row(&parsed, &loaded.metadata.airline_mapping, distance);
        let predictions = loaded.model.predict(arr2(&[row]).view())?;

        let (Some(&probability), Some(&raw_delay)) =
            (predictions.probability.get(0), predictions.delay.get(0))
        else {
            return Err(PipelineError::EmptyDataset { stage: "prediction" });
        };
        let delay = estimated_delay(probability, raw_delay);

        debug!(
            origin = %parsed.origin,
            destination = %parsed.destination,
            probability,
            raw_delay,
            "Predicted flight"
        );

        Ok(PredictionResult {
            probability_percent: round_response(probability * 100.0),
            estimated_delay_minutes: round_response(delay),
            risk_level: RiskLevel::from_probability(probability),
            airline_used: parsed.airline,
            calculated_distance: round_response(distance),
            route: format!("{} ➝ {}", parsed.origin, parsed.destination),
        })
    }

    /// [`FlightPredictor::predict`] folded into a response body.
    pub fn respond(&self, request: &FlightRequest) -> PredictionResponse {
        match self.predict(request) {
            Ok(result) => PredictionResponse::Prediction(result),
            Err(e) => PredictionResponse::Error {
                error: e.to_string(),
            },
        }
    }
}
