//! CLI entry point for the flight delay scorecard.
//!
//! Provides subcommands for training the delay model and building the airport
//! scorecard, predicting a single flight, reading back the scorecard, and
//! checking which artifacts exist.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flight_delay_scorecard::{
    airports::AirportDirectory,
    config::PipelineConfig,
    inference::{FlightPredictor, FlightRequest, PredictionResponse, PredictorStatus},
    loader::{FLIGHTS_FILE, load_airports},
    model::{METADATA_FILE, MODEL_FILE},
    output::{SCORECARD_FILE, ScorecardStore},
    pipeline::run_training,
    scorecard::summarize,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "flight_delay_scorecard")]
#[command(about = "Predict flight delays and rank airports", long_about = None)]
struct Cli {
    /// Directory holding flights.csv, airlines.csv and airports.csv
    #[arg(long, global = true, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory the model, metadata and scorecard are written to
    #[arg(long, global = true, env = "OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Optional JSON config file overriding pipeline defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the delay model and build the airport scorecard
    Train {
        /// Only read the first N flights
        #[arg(long)]
        rows: Option<usize>,
    },
    /// Predict delay risk for a single flight
    Predict {
        #[arg(long)]
        origin: Option<String>,

        #[arg(long)]
        destination: Option<String>,

        /// Scheduled departure hour (0-23)
        #[arg(long)]
        hour: Option<i64>,

        /// Day of week, 1 = Monday
        #[arg(long)]
        day_of_week: Option<i64>,

        #[arg(long)]
        month: Option<i64>,

        /// Two-letter airline code
        #[arg(long)]
        airline: Option<String>,

        /// Full request body as JSON; overrides the individual flags
        #[arg(long, conflicts_with_all = ["origin", "destination", "hour", "day_of_week", "month", "airline"])]
        json: Option<String>,
    },
    /// Show the persisted airport scorecard
    Scorecard {
        /// Number of airports to list
        #[arg(short = 'n', long, default_value_t = 10)]
        top: usize,

        /// Re-read the scorecard file even if a cached copy is fresh
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Report which trained artifacts are present
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/flight_delay_scorecard.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("flight_delay_scorecard.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Train { rows } => {
            if rows.is_some() {
                config.row_limit = rows;
            }
            train(cli.data_dir, cli.output_dir, config).await?;
        }
        Commands::Predict {
            origin,
            destination,
            hour,
            day_of_week,
            month,
            airline,
            json,
        } => {
            let predictor = predictor(&cli.data_dir, &cli.output_dir)?;
            let response = match json {
                Some(body) => match FlightRequest::from_json(&body) {
                    Ok(request) => predictor.respond(&request),
                    Err(e) => PredictionResponse::Error {
                        error: e.to_string(),
                    },
                },
                None => predictor.respond(&FlightRequest {
                    origin_airport: origin.as_deref().map(Into::into),
                    destination_airport: destination.as_deref().map(Into::into),
                    hour: hour.map(Into::into),
                    day_of_week: day_of_week.map(Into::into),
                    month: month.map(Into::into),
                    airline: airline.as_deref().map(Into::into),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Scorecard { top, refresh } => {
            show_scorecard(&cli.output_dir, &config, top, refresh)?;
        }
        Commands::Status => {
            status(&cli.data_dir, &cli.output_dir);
        }
    }

    Ok(())
}

/// Runs the training pipeline on a blocking thread. Ctrl+C asks it to stop at
/// the next epoch boundary, in which case no artifacts are written.
#[tracing::instrument(skip_all, fields(data_dir = %data_dir.display(), output_dir = %output_dir.display()))]
async fn train(data_dir: PathBuf, output_dir: PathBuf, config: PipelineConfig) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current epoch");
            stop_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let started = std::time::Instant::now();
    let report = tokio::task::spawn_blocking(move || {
        run_training(&data_dir, &output_dir, &config, &stop)
    })
    .await
    .context("training task panicked")?
    .context("training run failed")?;

    info!(
        flights_analysed = report.flights_analysed,
        flights_in_model = report.flights_in_model,
        epochs = report.history.epochs_run(),
        auc = %format!("{:.4}", report.auc),
        mae_minutes = %format!("{:.2}", report.mae),
        elapsed_secs = started.elapsed().as_secs(),
        "Training completed"
    );
    for (i, entry) in report.scorecard.iter().take(3).enumerate() {
        info!(rank = i + 1, airport = %entry.airport, score = entry.score, "Top airport");
    }
    Ok(())
}

fn predictor(data_dir: &Path, output_dir: &Path) -> Result<FlightPredictor> {
    let airports = load_airports(data_dir)
        .with_context(|| format!("failed to read airports from {}", data_dir.display()))?;
    let directory = AirportDirectory::from_airports(&airports);
    Ok(FlightPredictor::new(output_dir, Arc::new(directory)))
}

fn show_scorecard(output_dir: &Path, config: &PipelineConfig, top: usize, refresh: bool) -> Result<()> {
    let store = ScorecardStore::new(
        output_dir,
        Duration::from_secs(config.scorecard_max_age_secs),
    );
    let loaded = if refresh { store.refresh() } else { store.get() };
    let entries = match loaded {
        Ok(entries) => entries,
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "No scorecard yet; run `train` first");
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", store.path().display()));
        }
    };

    if let Some(summary) = summarize(&entries) {
        info!(
            total_airports = summary.total_airports,
            best_airport = %summary.best_airport,
            best_score = summary.best_score,
            worst_airport = %summary.worst_airport,
            worst_score = summary.worst_score,
            avg_delay = %format!("{:.1}", summary.avg_delay),
            avg_score = %format!("{:.1}", summary.avg_score),
            "Scorecard summary"
        );
    } else {
        info!("Scorecard is empty");
    }

    for (i, entry) in entries.iter().take(top).enumerate() {
        info!(
            rank = i + 1,
            airport = %entry.airport,
            score = entry.score,
            avg_delay = entry.avg_delay,
            on_time_rate = entry.on_time_rate,
            flights = entry.flights,
            "Airport"
        );
    }
    Ok(())
}

fn status(data_dir: &Path, output_dir: &Path) {
    let files = [
        ("flights", data_dir.join(FLIGHTS_FILE)),
        ("scorecard", output_dir.join(SCORECARD_FILE)),
        ("model", output_dir.join(MODEL_FILE)),
        ("metadata", output_dir.join(METADATA_FILE)),
    ];
    for (name, path) in &files {
        info!(artifact = *name, path = %path.display(), exists = path.exists(), "Artifact");
    }

    let predictor = FlightPredictor::new(output_dir, Arc::new(AirportDirectory::default()));
    let _ = predictor.load();
    match predictor.status() {
        PredictorStatus::Loaded => info!("Model loads and is ready for predictions"),
        PredictorStatus::Unloaded => warn!("Model not trained yet"),
        PredictorStatus::Failed(reason) => warn!(reason = %reason, "Model artifacts are unusable"),
    }
}
