use flight_delay_scorecard::airports::AirportDirectory;
use flight_delay_scorecard::config::{PipelineConfig, TrainingConfig};
use flight_delay_scorecard::error::PipelineError;
use flight_delay_scorecard::geo::{Coordinate, haversine_miles};
use flight_delay_scorecard::inference::{FlightPredictor, FlightRequest, PredictionResponse};
use flight_delay_scorecard::loader::{
    AIRLINES_FILE, AIRPORT_IDS_FILE, AIRPORTS_FILE, FLIGHTS_FILE, load_airports,
};
use flight_delay_scorecard::model::{METADATA_FILE, MODEL_FILE, ModelMetadata};
use flight_delay_scorecard::output::{
    PREDICTIONS_FILE, SCORECARD_FILE, SUMMARY_FILE, ScorecardStore, read_scorecard,
};
use flight_delay_scorecard::pipeline::run_training;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

const FLIGHT_COUNT: usize = 400;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes a small but realistic data directory: four airports, three
/// airlines, a numeric-id origin, unmappable origins, cancellations and
/// missing distances.
fn write_data_dir(dir: &Path) {
    let airports = ["ATL", "ORD", "DEN", "LAX"];
    let airlines = ["AA", "DL", "WN"];

    let mut flights = String::from(
        "YEAR,MONTH,DAY,DAY_OF_WEEK,AIRLINE,FLIGHT_NUMBER,ORIGIN_AIRPORT,DESTINATION_AIRPORT,\
         SCHEDULED_DEPARTURE,DISTANCE,ARRIVAL_DELAY,CANCELLED\n",
    );
    for i in 0..FLIGHT_COUNT {
        let origin = if i % 25 == 24 {
            "99999".to_string()
        } else if i % 50 == 3 {
            "10397".to_string()
        } else {
            airports[i % 4].to_string()
        };
        let dest = airports[(i + 1) % 4];
        let departure = (i % 24) * 100 + 5;
        let distance = if i % 13 == 0 {
            String::new()
        } else {
            format!("{}", 300 + (i * 17) % 2000)
        };
        let cancelled = i % 17 == 0;
        let delay = if cancelled {
            String::new()
        } else {
            (((i * 37) % 120) as i64 - 20).to_string()
        };
        writeln!(
            flights,
            "2015,{},{},{},{},{},{},{},{},{},{},{}",
            1 + i % 12,
            1 + i % 28,
            1 + i % 7,
            airlines[i % 3],
            1000 + i,
            origin,
            dest,
            departure,
            distance,
            delay,
            u8::from(cancelled),
        )
        .unwrap();
    }
    fs::write(dir.join(FLIGHTS_FILE), flights).unwrap();

    fs::write(
        dir.join(AIRLINES_FILE),
        "IATA_CODE,AIRLINE\nAA,American Airlines Inc.\nDL,Delta Air Lines Inc.\nWN,Southwest Airlines Co.\n",
    )
    .unwrap();

    fs::write(
        dir.join(AIRPORTS_FILE),
        "IATA_CODE,AIRPORT,CITY,STATE,COUNTRY,LATITUDE,LONGITUDE\n\
         ATL,Hartsfield-Jackson Atlanta International Airport,Atlanta,GA,USA,33.64044,-84.42694\n\
         ORD,Chicago O'Hare International Airport,Chicago,IL,USA,41.9796,-87.90446\n\
         DEN,Denver International Airport,Denver,CO,USA,39.85841,-104.667\n\
         LAX,Los Angeles International Airport,Los Angeles,CA,USA,33.94254,-118.40807\n",
    )
    .unwrap();

    fs::write(dir.join(AIRPORT_IDS_FILE), "ID,IATA_CODE\n10397,ATL\n").unwrap();
}

fn quick_config() -> PipelineConfig {
    PipelineConfig {
        training: TrainingConfig {
            epochs: 3,
            batch_size: 32,
            seed: 7,
            ..TrainingConfig::default()
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn test_full_pipeline() {
    let root = temp_dir("flight_delay_scorecard_it_full");
    let data_dir = root.join("data");
    let output_dir = root.join("output");
    fs::create_dir_all(&data_dir).unwrap();
    write_data_dir(&data_dir);

    let stop = AtomicBool::new(false);
    let report = run_training(&data_dir, &output_dir, &quick_config(), &stop).unwrap();

    // every 25th origin is unmappable and dropped
    assert_eq!(report.flights_analysed, FLIGHT_COUNT);
    assert_eq!(report.flights_in_model, FLIGHT_COUNT - FLIGHT_COUNT / 25);
    assert_eq!(
        report.train_rows + report.validation_rows,
        report.flights_in_model
    );
    assert!((0.0..=1.0).contains(&report.auc));
    assert!(report.history.epochs_run() >= 1);

    for file in [
        MODEL_FILE,
        METADATA_FILE,
        SCORECARD_FILE,
        PREDICTIONS_FILE,
        SUMMARY_FILE,
    ] {
        assert!(output_dir.join(file).exists(), "{file} missing");
    }

    // scorecard: bounded, ranked, only airports with enough flights
    assert!(!report.scorecard.is_empty());
    for entry in &report.scorecard {
        assert!((0.0..=100.0).contains(&entry.score));
        assert!(entry.flights >= 10);
    }
    for pair in report.scorecard.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(
        read_scorecard(output_dir.join(SCORECARD_FILE)).unwrap(),
        report.scorecard
    );

    let predictions = fs::read_to_string(output_dir.join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(predictions.lines().count(), report.validation_rows + 1);

    let summary = fs::read_to_string(output_dir.join(SUMMARY_FILE)).unwrap();
    assert!(summary.contains(&format!("Total flights analyzed: {FLIGHT_COUNT}")));
    assert!(summary.contains("Top 5 Airports:"));
    assert!(summary.contains("Southwest Airlines Co."));

    let metadata = ModelMetadata::load(output_dir.join(METADATA_FILE)).unwrap();
    assert_eq!(metadata.input_dim, 9);
    assert_eq!(metadata.airline_mapping.len(), 3);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_predictor_after_training() {
    let root = temp_dir("flight_delay_scorecard_it_predict");
    let data_dir = root.join("data");
    let output_dir = root.join("output");
    fs::create_dir_all(&data_dir).unwrap();
    write_data_dir(&data_dir);

    let directory = Arc::new(AirportDirectory::from_airports(
        &load_airports(&data_dir).unwrap(),
    ));
    let predictor = FlightPredictor::new(&output_dir, Arc::clone(&directory));

    // nothing trained yet: structured error, no panic
    match predictor.respond(&FlightRequest::default()) {
        PredictionResponse::Error { error } => assert!(error.contains("not trained")),
        other => panic!("expected error response, got {other:?}"),
    }

    let stop = AtomicBool::new(false);
    run_training(&data_dir, &output_dir, &quick_config(), &stop).unwrap();

    let request = FlightRequest::from_json(
        r#"{"ORIGIN_AIRPORT":"atl","DESTINATION_AIRPORT":"LAX","HOUR":"18","DAY_OF_WEEK":5,"MONTH":7,"AIRLINE":"WN"}"#,
    )
    .unwrap();
    let result = predictor.predict(&request).unwrap();
    let expected = haversine_miles(
        Coordinate::new(33.64044, -84.42694),
        Coordinate::new(33.94254, -118.40807),
    );
    assert!((result.calculated_distance - expected).abs() <= 0.05);
    assert_eq!(result.route, "ATL ➝ LAX");
    assert_eq!(result.airline_used, "WN");
    assert!((0.0..=100.0).contains(&result.probability_percent));

    let unknown = FlightRequest::from_json(
        r#"{"ORIGIN_AIRPORT":"QQQ","DESTINATION_AIRPORT":"LAX","AIRLINE":"ZZ"}"#,
    )
    .unwrap();
    let result = predictor.predict(&unknown).unwrap();
    assert_eq!(result.calculated_distance, 1000.0);

    let malformed = FlightRequest::from_json(r#"{"HOUR":"late"}"#).unwrap();
    assert!(matches!(
        predictor.respond(&malformed),
        PredictionResponse::Error { .. }
    ));

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_interrupted_training_writes_nothing() {
    let root = temp_dir("flight_delay_scorecard_it_interrupt");
    let data_dir = root.join("data");
    let output_dir = root.join("output");
    fs::create_dir_all(&data_dir).unwrap();
    write_data_dir(&data_dir);

    let stop = AtomicBool::new(true);
    let err = run_training(&data_dir, &output_dir, &quick_config(), &stop).unwrap_err();
    assert!(matches!(err, PipelineError::Interrupted { epoch: 0 }));
    assert!(!output_dir.join(MODEL_FILE).exists());
    assert!(!output_dir.join(SCORECARD_FILE).exists());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_missing_flights_table() {
    let root = temp_dir("flight_delay_scorecard_it_missing");
    let stop = AtomicBool::new(false);
    let err = run_training(&root, root.join("output"), &quick_config(), &stop).unwrap_err();
    assert!(matches!(err, PipelineError::MissingInputFile { .. }));
    assert!(!err.is_recoverable());
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_scorecard_store_serves_trained_scorecard() {
    let root = temp_dir("flight_delay_scorecard_it_store");
    let data_dir = root.join("data");
    let output_dir = root.join("output");
    fs::create_dir_all(&data_dir).unwrap();
    write_data_dir(&data_dir);

    let store = ScorecardStore::new(&output_dir, Duration::from_secs(300));
    assert!(store.get().unwrap_err().is_recoverable());

    let stop = AtomicBool::new(false);
    let report = run_training(&data_dir, &output_dir, &quick_config(), &stop).unwrap();

    let served = store.get().unwrap();
    assert_eq!(*served, report.scorecard);
    let summary = flight_delay_scorecard::scorecard::summarize(&served).unwrap();
    assert_eq!(summary.best_airport, report.scorecard[0].airport);
    assert_eq!(summary.total_airports, report.scorecard.len());

    fs::remove_dir_all(&root).unwrap();
}
