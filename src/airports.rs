//! Airport identifiers and coordinates.
//!
//! The flights table mixes IATA codes with numeric BTS airport ids for some
//! months. [`AirportCodeMapper`] resolves both to a canonical 3-letter code;
//! [`AirportDirectory`] holds coordinates for distance lookups. Both are
//! built once at start-up and shared by reference.

use crate::error::Result;
use crate::geo::Coordinate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

/// A row of `airports.csv`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Airport {
    #[serde(rename = "IATA_CODE")]
    pub iata_code: String,
    #[serde(rename = "AIRPORT", default)]
    pub name: Option<String>,
    #[serde(rename = "CITY", default)]
    pub city: Option<String>,
    #[serde(rename = "STATE", default)]
    pub state: Option<String>,
    #[serde(rename = "COUNTRY", default)]
    pub country: Option<String>,
    #[serde(rename = "LATITUDE", default, deserialize_with = "csv::invalid_option")]
    pub latitude: Option<f64>,
    #[serde(rename = "LONGITUDE", default, deserialize_with = "csv::invalid_option")]
    pub longitude: Option<f64>,
}

/// A row of the numeric-id lookup table (`airport_ids.csv`).
#[derive(Debug, Deserialize)]
struct AirportIdRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "IATA_CODE")]
    iata_code: String,
}

/// Reads `airport_ids.csv`-style rows into an id → code table.
pub fn load_id_table<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut table = HashMap::new();

    for result in rdr.deserialize() {
        let row: AirportIdRow = result?;
        table.insert(row.id.trim().to_string(), row.iata_code.trim().to_uppercase());
    }

    Ok(table)
}

#[derive(Debug, Clone, Default)]
pub struct AirportCodeMapper {
    known_codes: HashSet<String>,
    numeric_ids: HashMap<String, String>,
}

impl AirportCodeMapper {
    pub fn new(airports: &[Airport], numeric_ids: HashMap<String, String>) -> Self {
        let known_codes = airports
            .iter()
            .map(|a| a.iata_code.trim().to_uppercase())
            .collect();
        Self {
            known_codes,
            numeric_ids,
        }
    }

    /// Resolves a raw identifier to a canonical code, or `None` when it
    /// cannot be mapped.
    ///
    /// Alphabetic 3-letter identifiers pass through (restricted to known
    /// codes once an airport table is loaded); numeric ids go through the
    /// lookup table.
    pub fn code_for(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.len() == 3 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
            let code = raw.to_ascii_uppercase();
            if self.known_codes.is_empty() || self.known_codes.contains(&code) {
                return Some(code);
            }
            return None;
        }

        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            return self.numeric_ids.get(raw).cloned();
        }

        None
    }

    pub fn known_code_count(&self) -> usize {
        self.known_codes.len()
    }
}

/// Airport coordinates keyed by IATA code.
#[derive(Debug, Clone, Default)]
pub struct AirportDirectory {
    coords: HashMap<String, Coordinate>,
}

impl AirportDirectory {
    /// Keeps airports with both coordinates present.
    pub fn from_airports(airports: &[Airport]) -> Self {
        let coords = airports
            .iter()
            .filter_map(|a| match (a.latitude, a.longitude) {
                (Some(lat), Some(lon)) => {
                    Some((a.iata_code.trim().to_uppercase(), Coordinate::new(lat, lon)))
                }
                _ => None,
            })
            .collect();
        Self { coords }
    }

    pub fn coordinate(&self, code: &str) -> Option<Coordinate> {
        self.coords.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}
