//! Persistence of run results: scorecard and predictions CSVs, the plain-text
//! run summary, and the cached scorecard reader used by the CLI.
//!
//! Every file is written to a temporary sibling first and renamed into place,
//! so readers never observe a half-written artifact.

use crate::cache::ArtifactCache;
use crate::error::{PipelineError, Result};
use crate::scorecard::{PredictionRow, ScorecardEntry};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SCORECARD_FILE: &str = "airport_scorecard.csv";
pub const PREDICTIONS_FILE: &str = "predictions.csv";
pub const SUMMARY_FILE: &str = "summary.txt";

const SCORECARD_HEADERS: [&str; 9] = [
    "Airport",
    "Score",
    "Avg_Delay",
    "Delay_Rate",
    "OnTime_Rate",
    "MAE",
    "Precision",
    "Recall",
    "Flights",
];

const PREDICTION_HEADERS: [&str; 5] = [
    "Airport",
    "True_Significant_Delay",
    "Pred_Significant_Delay_Prob",
    "True_Total_Delay",
    "Pred_Total_Delay",
];

/// Writes `bytes` to `path` via a temporary file in the same directory.
///
/// Creates the parent directory when it does not exist yet.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file");
    Ok(())
}

/// Serializes `rows` as CSV. An empty table still gets its header line.
fn write_csv<T: Serialize>(path: &Path, rows: &[T], headers: &[&str]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(!rows.is_empty())
        .from_writer(Vec::new());

    if rows.is_empty() {
        writer.write_record(headers)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    write_atomic(path, &bytes)?;
    Ok(())
}

pub fn write_scorecard<P: AsRef<Path>>(path: P, entries: &[ScorecardEntry]) -> Result<()> {
    let path = path.as_ref();
    write_csv(path, entries, &SCORECARD_HEADERS)?;
    info!(path = %path.display(), airports = entries.len(), "Saved scorecard");
    Ok(())
}

pub fn write_predictions<P: AsRef<Path>>(path: P, rows: &[PredictionRow]) -> Result<()> {
    let path = path.as_ref();
    write_csv(path, rows, &PREDICTION_HEADERS)?;
    info!(path = %path.display(), flights = rows.len(), "Saved predictions");
    Ok(())
}

/// Reads a persisted scorecard.
///
/// A missing file is [`PipelineError::MissingArtifact`]; a malformed one is
/// reported as a CSV error.
pub fn read_scorecard<P: AsRef<Path>>(path: P) -> Result<Vec<ScorecardEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PipelineError::MissingArtifact {
            path: path.to_path_buf(),
        });
    }

    let mut reader = csv::Reader::from_path(path)?;
    let entries = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ScorecardEntry>, _>>()?;
    debug!(path = %path.display(), airports = entries.len(), "Read scorecard");
    Ok(entries)
}

/// Figures reported in `summary.txt` at the end of a training run.
#[derive(Debug, Clone)]
pub struct RunSummary<'a> {
    pub generated_at: DateTime<Utc>,
    pub flights_analysed: usize,
    pub flights_in_model: usize,
    pub auc: f64,
    pub mae: f64,
    pub scorecard: &'a [ScorecardEntry],
    /// Airline code and display name (when known), in encoder order.
    pub airlines: Vec<(String, Option<String>)>,
}

fn airport_line(out: &mut String, rank: usize, entry: &ScorecardEntry) {
    let _ = writeln!(
        out,
        "{rank}. {}: Score={}, Delay={}min",
        entry.airport, entry.score, entry.avg_delay
    );
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Flight Delay Prediction Summary");
    let _ = writeln!(
        out,
        "Generated: {}",
        summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out, "Total flights analyzed: {}", summary.flights_analysed);
    let _ = writeln!(out, "Flights in model: {}", summary.flights_in_model);
    let _ = writeln!(out, "Airports analyzed: {}", summary.scorecard.len());
    let _ = writeln!(out, "Model AUC: {:.4}", summary.auc);
    let _ = writeln!(out, "Model MAE: {:.2} minutes", summary.mae);

    let _ = writeln!(out, "\nTop 5 Airports:");
    for (i, entry) in summary.scorecard.iter().take(5).enumerate() {
        airport_line(&mut out, i + 1, entry);
    }

    let _ = writeln!(out, "\nBottom 5 Airports:");
    let start = summary.scorecard.len().saturating_sub(5);
    for (i, entry) in summary.scorecard.iter().enumerate().skip(start) {
        airport_line(&mut out, i + 1, entry);
    }

    let _ = writeln!(out, "\nAirlines in model: {}", summary.airlines.len());
    for (code, name) in &summary.airlines {
        match name {
            Some(name) => {
                let _ = writeln!(out, "  {code}: {name}");
            }
            None => {
                let _ = writeln!(out, "  {code}");
            }
        }
    }
    out
}

pub fn write_summary<P: AsRef<Path>>(path: P, summary: &RunSummary) -> Result<()> {
    let path = path.as_ref();
    write_atomic(path, render_summary(summary).as_bytes())?;
    info!(path = %path.display(), "Saved summary");
    Ok(())
}

/// Serves the persisted scorecard, re-reading the file once the cached copy
/// is older than `max_age`.
#[derive(Debug)]
pub struct ScorecardStore {
    path: PathBuf,
    max_age: Duration,
    cache: ArtifactCache<PathBuf, Arc<Vec<ScorecardEntry>>>,
}

impl ScorecardStore {
    pub fn new<P: AsRef<Path>>(output_dir: P, max_age: Duration) -> Self {
        Self {
            path: output_dir.as_ref().join(SCORECARD_FILE),
            max_age,
            cache: ArtifactCache::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached scorecard when fresh, otherwise a reload from disk.
    pub fn get(&self) -> Result<Arc<Vec<ScorecardEntry>>> {
        if let Some(entries) = self.cache.get_fresh(&self.path, self.max_age) {
            debug!(airports = entries.len(), "Serving cached scorecard");
            return Ok(entries);
        }
        self.refresh()
    }

    /// Re-reads the file regardless of cache age.
    ///
    /// On failure the previously cached copy is left in place and remains
    /// reachable through [`ScorecardStore::cached`].
    pub fn refresh(&self) -> Result<Arc<Vec<ScorecardEntry>>> {
        match read_scorecard(&self.path) {
            Ok(entries) => {
                let entries = Arc::new(entries);
                self.cache.put(self.path.clone(), Arc::clone(&entries));
                info!(airports = entries.len(), "Loaded scorecard");
                Ok(entries)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Scorecard refresh failed");
                Err(e)
            }
        }
    }

    /// Last successfully loaded scorecard and its age, however stale.
    pub fn cached(&self) -> Option<(Arc<Vec<ScorecardEntry>>, Duration)> {
        self.cache.get(&self.path)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn entry(airport: &str, score: f64) -> ScorecardEntry {
        ScorecardEntry {
            airport: airport.to_string(),
            score,
            avg_delay: 7.5,
            delay_rate: 12.0,
            on_time_rate: 81.3,
            mae: 9.1,
            precision: 55.0,
            recall: 40.2,
            flights: 120,
        }
    }

    #[test]
    fn test_write_atomic_creates_parent_and_leaves_no_temp() {
        let dir = temp_path("flight_delay_scorecard_atomic");
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("file.txt");

        write_atomic(&path, b"hello").unwrap();
        write_atomic(&path, b"replaced").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "replaced");
        assert!(!dir.join("nested").join(".file.txt.tmp").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_scorecard_csv_round_trip() {
        let path = temp_path("flight_delay_scorecard_test_scorecard.csv");
        let _ = fs::remove_file(&path);

        let entries = vec![entry("ATL", 81.2), entry("ORD", 64.9)];
        write_scorecard(&path, &entries).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header = content.lines().next().unwrap();
        assert_eq!(header, SCORECARD_HEADERS.join(","));
        assert_eq!(read_scorecard(&path).unwrap(), entries);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_empty_tables_keep_headers() {
        let path = temp_path("flight_delay_scorecard_test_empty_predictions.csv");
        let _ = fs::remove_file(&path);

        write_predictions(&path, &[]).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), PREDICTION_HEADERS.join(","));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_predictions_header_once() {
        let path = temp_path("flight_delay_scorecard_test_predictions.csv");
        let _ = fs::remove_file(&path);

        let row = PredictionRow {
            airport: "DEN".to_string(),
            true_significant_delay: 1,
            pred_significant_delay_prob: 0.73,
            true_total_delay: 48.0,
            pred_total_delay: 35.2,
        };
        write_predictions(&path, &[row.clone(), row]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], PREDICTION_HEADERS.join(","));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_missing_scorecard() {
        let path = temp_path("flight_delay_scorecard_missing.csv");
        let _ = fs::remove_file(&path);
        let err = read_scorecard(&path).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { .. }));
    }

    #[test]
    fn test_read_malformed_scorecard_is_an_error() {
        let path = temp_path("flight_delay_scorecard_malformed.csv");
        fs::write(&path, "Airport,Score\nATL,not-a-number\n").unwrap();
        let err = read_scorecard(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Csv(_)));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_render_summary() {
        let card: Vec<_> = (0..7)
            .map(|i| entry(&format!("A{i:02}"), 90.0 - i as f64))
            .collect();
        let summary = RunSummary {
            generated_at: Utc::now(),
            flights_analysed: 1000,
            flights_in_model: 950,
            auc: 0.71234,
            mae: 18.456,
            scorecard: &card,
            airlines: vec![
                ("WN".to_string(), Some("Southwest Airlines Co.".to_string())),
                ("ZZ".to_string(), None),
            ],
        };
        let text = render_summary(&summary);

        assert!(text.contains("Total flights analyzed: 1000"));
        assert!(text.contains("Flights in model: 950"));
        assert!(text.contains("Airports analyzed: 7"));
        assert!(text.contains("Model AUC: 0.7123"));
        assert!(text.contains("Model MAE: 18.46 minutes"));
        assert!(text.contains("1. A00: Score=90, Delay=7.5min"));
        // bottom block starts at rank 3 of 7
        assert!(text.contains("3. A02: Score=88"));
        assert!(text.contains("7. A06: Score=84"));
        assert!(text.contains("  WN: Southwest Airlines Co."));
        assert!(text.contains("  ZZ\n"));
    }

    #[test]
    fn test_store_caches_and_refreshes() {
        let dir = temp_path("flight_delay_scorecard_store");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let store = ScorecardStore::new(&dir, Duration::from_secs(300));
        let err = store.get().unwrap_err();
        assert!(err.is_recoverable());
        assert!(store.cached().is_none());

        write_scorecard(store.path(), &[entry("ATL", 80.0)]).unwrap();
        assert_eq!(store.get().unwrap().len(), 1);

        // a fresh cache entry hides the new file until refresh
        write_scorecard(store.path(), &[entry("ATL", 80.0), entry("BOS", 70.0)]).unwrap();
        assert_eq!(store.get().unwrap().len(), 1);
        assert_eq!(store.refresh().unwrap().len(), 2);

        // a broken file fails the refresh but keeps the old copy
        fs::write(store.path(), "Airport,Score\nATL,oops\n").unwrap();
        assert!(store.refresh().is_err());
        let (cached, _) = store.cached().unwrap();
        assert_eq!(cached.len(), 2);

        store.invalidate();
        assert!(store.cached().is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_store_zero_max_age_always_reloads() {
        let dir = temp_path("flight_delay_scorecard_store_zero");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let store = ScorecardStore::new(&dir, Duration::ZERO);
        write_scorecard(store.path(), &[entry("ATL", 80.0)]).unwrap();
        assert_eq!(store.get().unwrap().len(), 1);
        write_scorecard(store.path(), &[entry("ATL", 80.0), entry("BOS", 70.0)]).unwrap();
        assert_eq!(store.get().unwrap().len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }
}
