//! Delay labels derived from raw flight records.

use crate::loader::FlightRecord;
use tracing::info;

/// Arrival delay (minutes) above which a flight counts as significantly delayed.
pub const SIGNIFICANT_DELAY_MINUTES: f64 = 30.0;
/// Total delay assigned to cancelled flights.
pub const CANCELLED_DELAY_MINUTES: f64 = 300.0;

/// Binary and continuous targets for one flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelPair {
    pub significant_delay: u8,
    pub total_delay: f64,
}

impl LabelPair {
    pub fn from_record(record: &FlightRecord) -> Self {
        if record.is_cancelled() {
            return Self {
                significant_delay: 1,
                total_delay: CANCELLED_DELAY_MINUTES,
            };
        }

        match record.arrival_delay {
            Some(delay) => Self {
                significant_delay: u8::from(delay > SIGNIFICANT_DELAY_MINUTES),
                total_delay: delay,
            },
            None => Self {
                significant_delay: 0,
                total_delay: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelledFlight {
    pub record: FlightRecord,
    pub labels: LabelPair,
}

/// Zero-pads a scheduled departure time to four characters (`"5"` → `"0005"`).
pub fn pad_departure(raw: &str) -> String {
    format!("{:0>4}", raw.trim())
}

/// Normalises departure times and attaches labels to every record.
#[tracing::instrument(skip_all, fields(flights = records.len()))]
pub fn preprocess(records: Vec<FlightRecord>) -> Vec<LabelledFlight> {
    let mut cancelled = 0usize;
    let mut significant = 0usize;
    let mut delay_sum = 0.0;

    let flights: Vec<LabelledFlight> = records
        .into_iter()
        .map(|mut record| {
            record.scheduled_departure = record.scheduled_departure.as_deref().map(pad_departure);
            let labels = LabelPair::from_record(&record);

            if record.is_cancelled() {
                cancelled += 1;
            }
            significant += usize::from(labels.significant_delay);
            delay_sum += labels.total_delay;

            LabelledFlight { record, labels }
        })
        .collect();

    let avg_delay = if flights.is_empty() {
        0.0
    } else {
        delay_sum / flights.len() as f64
    };

    info!(
        cancelled,
        significant_delays = significant,
        avg_delay = %format!("{:.1}", avg_delay),
        "Derived delay labels"
    );

    flights
}
