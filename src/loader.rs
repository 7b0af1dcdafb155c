//! CSV readers for the flights, airlines and airports source tables.

use crate::airports::{self, Airport};
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const FLIGHTS_FILE: &str = "flights.csv";
pub const AIRLINES_FILE: &str = "airlines.csv";
pub const AIRPORTS_FILE: &str = "airports.csv";
pub const AIRPORT_IDS_FILE: &str = "airport_ids.csv";

/// One row of `flights.csv`. Columns not named here are ignored; empty or
/// unparsable numeric cells read as `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightRecord {
    #[serde(rename = "SCHEDULED_DEPARTURE", default)]
    pub scheduled_departure: Option<String>,
    #[serde(rename = "DAY_OF_WEEK", default, deserialize_with = "csv::invalid_option")]
    pub day_of_week: Option<u32>,
    #[serde(rename = "MONTH", default, deserialize_with = "csv::invalid_option")]
    pub month: Option<u32>,
    #[serde(rename = "AIRLINE", default)]
    pub airline: Option<String>,
    #[serde(rename = "ORIGIN_AIRPORT", default)]
    pub origin_airport: Option<String>,
    #[serde(rename = "DESTINATION_AIRPORT", default)]
    pub destination_airport: Option<String>,
    #[serde(rename = "DISTANCE", default, deserialize_with = "csv::invalid_option")]
    pub distance: Option<f64>,
    #[serde(rename = "ARRIVAL_DELAY", default, deserialize_with = "csv::invalid_option")]
    pub arrival_delay: Option<f64>,
    #[serde(rename = "CANCELLED", default, deserialize_with = "csv::invalid_option")]
    pub cancelled: Option<u8>,
}

impl FlightRecord {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled == Some(1)
    }
}

/// A row of `airlines.csv`.
#[derive(Debug, Clone, Deserialize)]
pub struct Airline {
    #[serde(rename = "IATA_CODE")]
    pub iata_code: String,
    #[serde(rename = "AIRLINE")]
    pub name: String,
}

/// The three source tables of a training run.
#[derive(Debug, Default)]
pub struct SourceTables {
    pub flights: Vec<FlightRecord>,
    pub airlines: Vec<Airline>,
    pub airports: Vec<Airport>,
    /// Numeric BTS airport id → IATA code, empty when no lookup file exists.
    pub airport_ids: HashMap<String, String>,
}

impl SourceTables {
    pub fn airline_names(&self) -> HashMap<&str, &str> {
        self.airlines
            .iter()
            .map(|a| (a.iata_code.as_str(), a.name.as_str()))
            .collect()
    }
}

/// Reads every row of a CSV file into `T`.
pub fn read_table<T, P>(path: P) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    read_table_limited(path, None)
}

fn read_table_limited<T, P>(path: P, limit: Option<usize>) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut rows = Vec::new();

    for result in rdr.deserialize() {
        if limit.is_some_and(|n| rows.len() >= n) {
            break;
        }
        let record: T = result?;
        rows.push(record);
    }

    Ok(rows)
}

/// Reads an optional table, returning an empty one when the file is absent.
fn read_optional<T>(path: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.exists() {
        warn!(path = %path.display(), "Optional table missing, continuing without it");
        return Ok(Vec::new());
    }
    read_table(path)
}

/// Reads only `airports.csv`, empty when absent.
pub fn load_airports<P: AsRef<Path>>(data_dir: P) -> Result<Vec<Airport>> {
    read_optional(&data_dir.as_ref().join(AIRPORTS_FILE))
}

/// Loads the source tables from `data_dir`.
///
/// `flights.csv` is required; the airline, airport and airport-id tables are
/// optional.
#[tracing::instrument(skip(data_dir), fields(data_dir = %data_dir.as_ref().display()))]
pub fn load_data<P: AsRef<Path>>(
    data_dir: P,
    row_limit: Option<usize>,
) -> Result<SourceTables> {
    let data_dir = data_dir.as_ref();
    let flights_path: PathBuf = data_dir.join(FLIGHTS_FILE);

    if !flights_path.exists() {
        return Err(PipelineError::MissingInputFile { path: flights_path });
    }

    let flights: Vec<FlightRecord> = read_table_limited(&flights_path, row_limit)?;
    match row_limit {
        Some(limit) => info!(rows = flights.len(), limit, "Loaded flights"),
        None => info!(rows = flights.len(), "Loaded flights (full dataset)"),
    }

    let airlines: Vec<Airline> = read_optional(&data_dir.join(AIRLINES_FILE))?;
    let airports: Vec<Airport> = read_optional(&data_dir.join(AIRPORTS_FILE))?;

    let ids_path = data_dir.join(AIRPORT_IDS_FILE);
    let airport_ids = if ids_path.exists() {
        airports::load_id_table(&ids_path)?
    } else {
        HashMap::new()
    };

    info!(
        airlines = airlines.len(),
        airports = airports.len(),
        airport_ids = airport_ids.len(),
        "Loaded reference tables"
    );

    Ok(SourceTables {
        flights,
        airlines,
        airports,
        airport_ids,
    })
}
