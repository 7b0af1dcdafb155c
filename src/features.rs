//! Feature engineering shared by the training and inference paths.
//!
//! Both paths build rows through [`encode_row`], so column order and
//! formulas are identical; a model trained on one is fed by the other.

use crate::airports::AirportCodeMapper;
use crate::error::{PipelineError, Result};
use crate::loader::FlightRecord;
use crate::preprocess::{LabelledFlight, pad_departure};
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::info;

pub const FEATURE_COUNT: usize = 9;

/// Column names in model input order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "dep_hour_sin",
    "dep_hour_cos",
    "day_of_week_sin",
    "day_of_week_cos",
    "month_sin",
    "month_cos",
    "is_weekend",
    "airline_encoded",
    "distance",
];

/// `(sin, cos)` of `value` on a circle with the given period.
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

pub fn is_weekend(day_of_week: i64) -> bool {
    matches!(day_of_week, 6 | 7)
}

/// Builds one model input row.
pub fn encode_row(
    hour: i64,
    day_of_week: i64,
    month: i64,
    airline_index: usize,
    distance: f64,
) -> [f64; FEATURE_COUNT] {
    let (hour_sin, hour_cos) = cyclical(hour as f64, 24.0);
    let (day_sin, day_cos) = cyclical(day_of_week as f64, 7.0);
    let (month_sin, month_cos) = cyclical(month as f64, 12.0);

    [
        hour_sin,
        hour_cos,
        day_sin,
        day_cos,
        month_sin,
        month_cos,
        if is_weekend(day_of_week) { 1.0 } else { 0.0 },
        airline_index as f64,
        distance,
    ]
}

/// Departure hour from the first two characters of the zero-padded time.
pub fn departure_hour(scheduled_departure: &str) -> Option<i64> {
    let padded = pad_departure(scheduled_departure);
    padded.get(..2)?.parse().ok()
}

/// Dense airline index assigned in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AirlineEncoder {
    mapping: BTreeMap<String, usize>,
}

impl AirlineEncoder {
    pub fn fit<'a, I>(airlines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut mapping = BTreeMap::new();
        for airline in airlines {
            let next = mapping.len();
            mapping.entry(airline.to_string()).or_insert(next);
        }
        Self { mapping }
    }

    pub fn get(&self, airline: &str) -> Option<usize> {
        self.mapping.get(airline).copied()
    }

    /// Index for `airline`, falling back to 0 for codes never seen in training.
    pub fn encode(&self, airline: &str) -> usize {
        self.get(airline).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Airline codes ordered by their index.
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<(&str, usize)> =
            self.mapping.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        codes.sort_by_key(|(_, idx)| *idx);
        codes.into_iter().map(|(code, _)| code).collect()
    }
}

/// Median of the values, averaging the two middle ones for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Parallel feature matrix, targets and airport codes.
#[derive(Debug, Clone)]
pub struct Samples {
    pub features: Array2<f64>,
    pub significant: Array1<f64>,
    pub total_delay: Array1<f64>,
    pub airports: Vec<String>,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits into the first `fraction` of rows and the remainder, keeping
    /// row order.
    pub fn split(&self, fraction: f64) -> (Samples, Samples) {
        let idx = ((fraction * self.len() as f64) as usize).min(self.len());
        let head = Samples {
            features: self.features.slice(s![..idx, ..]).to_owned(),
            significant: self.significant.slice(s![..idx]).to_owned(),
            total_delay: self.total_delay.slice(s![..idx]).to_owned(),
            airports: self.airports[..idx].to_vec(),
        };
        let tail = Samples {
            features: self.features.slice(s![idx.., ..]).to_owned(),
            significant: self.significant.slice(s![idx..]).to_owned(),
            total_delay: self.total_delay.slice(s![idx..]).to_owned(),
            airports: self.airports[idx..].to_vec(),
        };
        (head, tail)
    }
}

/// Output of [`FeatureEngineer::engineer`].
#[derive(Debug, Clone)]
pub struct EngineeredDataset {
    pub samples: Samples,
    pub encoder: AirlineEncoder,
    pub median_distance: Option<f64>,
}

pub struct FeatureEngineer<'a> {
    mapper: &'a AirportCodeMapper,
}

impl<'a> FeatureEngineer<'a> {
    pub fn new(mapper: &'a AirportCodeMapper) -> Self {
        Self { mapper }
    }

    /// Turns labelled flights into the model's feature matrix and targets.
    ///
    /// Rows whose origin cannot be mapped are dropped first; the airline
    /// encoding and the distance median are fit on the remaining rows.
    #[tracing::instrument(skip_all, fields(flights = flights.len()))]
    pub fn engineer(&self, flights: &[LabelledFlight]) -> Result<EngineeredDataset> {
        let mapped: Vec<(&LabelledFlight, String)> = flights
            .iter()
            .filter_map(|f| {
                let raw = f.record.origin_airport.as_deref()?;
                self.mapper.code_for(raw).map(|code| (f, code))
            })
            .collect();
        info!(
            kept = mapped.len(),
            dropped = flights.len() - mapped.len(),
            known_codes = self.mapper.known_code_count(),
            "Mapped origin airports to codes"
        );

        let encoder = AirlineEncoder::fit(
            mapped
                .iter()
                .filter_map(|(f, _)| f.record.airline.as_deref()),
        );

        let distances: Vec<f64> = mapped.iter().filter_map(|(f, _)| f.record.distance).collect();
        let median_distance = median(&distances);

        let mut rows = Vec::with_capacity(mapped.len());
        let mut significant = Vec::with_capacity(mapped.len());
        let mut total_delay = Vec::with_capacity(mapped.len());
        let mut airports = Vec::with_capacity(mapped.len());

        for (flight, code) in mapped {
            let Some(row) = row_for(&flight.record, &encoder, median_distance) else {
                continue;
            };
            rows.push(row);
            significant.push(f64::from(flight.labels.significant_delay));
            total_delay.push(flight.labels.total_delay);
            airports.push(code);
        }

        if rows.is_empty() {
            return Err(PipelineError::EmptyDataset {
                stage: "feature engineering",
            });
        }

        let mut features = Array2::zeros((rows.len(), FEATURE_COUNT));
        for (i, row) in rows.iter().enumerate() {
            features.row_mut(i).assign(&ArrayView1::from(&row[..]));
        }

        let unique_airports = airports
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        info!(
            features = FEATURE_COUNT,
            samples = rows.len(),
            unique_airports,
            airlines = encoder.len(),
            "Engineered features"
        );

        Ok(EngineeredDataset {
            samples: Samples {
                features,
                significant: Array1::from(significant),
                total_delay: Array1::from(total_delay),
                airports,
            },
            encoder,
            median_distance,
        })
    }
}

/// Feature row for a training record, or `None` when a required field is
/// missing.
fn row_for(
    record: &FlightRecord,
    encoder: &AirlineEncoder,
    median_distance: Option<f64>,
) -> Option<[f64; FEATURE_COUNT]> {
    let hour = departure_hour(record.scheduled_departure.as_deref()?)?;
    let day = i64::from(record.day_of_week?);
    let month = i64::from(record.month?);
    let airline = encoder.get(record.airline.as_deref()?)?;
    let distance = record.distance.or(median_distance)?;
    Some(encode_row(hour, day, month, airline, distance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::preprocess;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn record(origin: &str, airline: &str, dep: &str, distance: Option<f64>) -> FlightRecord {
        FlightRecord {
            scheduled_departure: Some(dep.to_string()),
            day_of_week: Some(6),
            month: Some(3),
            airline: Some(airline.to_string()),
            origin_airport: Some(origin.to_string()),
            destination_airport: Some("LAX".to_string()),
            distance,
            arrival_delay: Some(12.0),
            cancelled: Some(0),
        }
    }

    fn mapper() -> AirportCodeMapper {
        let mut ids = HashMap::new();
        ids.insert("10397".to_string(), "ATL".to_string());
        AirportCodeMapper::new(&[], ids)
    }

    #[test]
    fn test_departure_hour() {
        assert_eq!(departure_hour("5"), Some(0));
        assert_eq!(departure_hour("0905"), Some(9));
        assert_eq!(departure_hour("1530"), Some(15));
        assert_eq!(departure_hour("abcd"), None);
    }

    #[test]
    fn test_encode_row_layout() {
        let row = encode_row(6, 7, 3, 2, 1000.0);
        assert_eq!(row.len(), FEATURE_NAMES.len());
        assert!((row[0] - 1.0).abs() < 1e-12); // sin(π/2)
        assert!(row[1].abs() < 1e-12);
        assert_eq!(row[6], 1.0);
        assert_eq!(row[7], 2.0);
        assert_eq!(row[8], 1000.0);
    }

    #[test]
    fn test_weekend_flag() {
        assert!(is_weekend(6));
        assert!(is_weekend(7));
        assert!(!is_weekend(1));
        assert!(!is_weekend(5));
    }

    #[test]
    fn test_airline_encoder_first_seen_order() {
        let encoder = AirlineEncoder::fit(["WN", "AA", "WN", "DL"]);
        assert_eq!(encoder.get("WN"), Some(0));
        assert_eq!(encoder.get("AA"), Some(1));
        assert_eq!(encoder.get("DL"), Some(2));
        assert_eq!(encoder.encode("ZZ"), 0);
        assert_eq!(encoder.codes(), vec!["WN", "AA", "DL"]);
    }

    #[test]
    fn test_airline_encoder_serializes_as_map() {
        let encoder = AirlineEncoder::fit(["AA", "DL"]);
        let json = serde_json::to_string(&encoder).unwrap();
        assert_eq!(json, r#"{"AA":0,"DL":1}"#);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_engineer_drops_unmapped_and_fills_distance() {
        let flights = preprocess(vec![
            record("ATL", "AA", "0830", Some(100.0)),
            record("10397", "DL", "1415", None),
            record("99999", "UA", "0700", Some(5000.0)),
            record("SEA", "AA", "2200", Some(300.0)),
        ]);
        let mapper = mapper();
        let data = FeatureEngineer::new(&mapper).engineer(&flights).unwrap();

        assert_eq!(data.samples.len(), 3);
        assert_eq!(data.samples.features.ncols(), FEATURE_COUNT);
        assert_eq!(data.samples.airports, vec!["ATL", "ATL", "SEA"]);
        // median over mapped rows only (100, 300)
        assert_eq!(data.median_distance, Some(200.0));
        assert_eq!(data.samples.features[[1, 8]], 200.0);
        // UA only appeared on an unmapped row
        assert_eq!(data.encoder.get("UA"), None);
        assert_eq!(data.samples.features[[1, 7]], 1.0);
        assert_eq!(data.samples.features[[0, 6]], 1.0);
    }

    #[test]
    fn test_engineer_drops_rows_missing_required_fields() {
        let mut no_month = record("ATL", "AA", "0830", Some(100.0));
        no_month.month = None;
        let mut no_departure = record("ATL", "AA", "0830", Some(100.0));
        no_departure.scheduled_departure = None;

        let flights = preprocess(vec![
            no_month,
            no_departure,
            record("ATL", "AA", "0830", Some(100.0)),
        ]);
        let mapper = mapper();
        let data = FeatureEngineer::new(&mapper).engineer(&flights).unwrap();
        assert_eq!(data.samples.len(), 1);
    }

    #[test]
    fn test_engineer_empty_is_error() {
        let flights = preprocess(vec![record("99999", "AA", "0830", Some(1.0))]);
        let mapper = mapper();
        let err = FeatureEngineer::new(&mapper).engineer(&flights).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDataset { .. }));
    }

    #[test]
    fn test_split_keeps_row_order() {
        let flights = preprocess(
            (0..10)
                .map(|i| record("ATL", "AA", &format!("{:02}00", i), Some(i as f64)))
                .collect(),
        );
        let mapper = mapper();
        let data = FeatureEngineer::new(&mapper).engineer(&flights).unwrap();
        let (train, val) = data.samples.split(0.8);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        assert_eq!(val.features[[0, 8]], 8.0);
        assert_eq!(val.airports.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_cyclical_pairs_on_unit_circle(hour in 0i64..25, day in 1i64..8, month in 1i64..13) {
            let row = encode_row(hour, day, month, 0, 0.0);
            for pair in [(row[0], row[1]), (row[2], row[3]), (row[4], row[5])] {
                prop_assert!((pair.0.powi(2) + pair.1.powi(2) - 1.0).abs() < 1e-12);
            }
        }
    }
}
