//! CSV directory loader.
//!
//! Layout:
//! - `bars.csv` — `instrument,date,open,high,low,close,volume`
//! - `fundamentals.csv` (optional) — `instrument,date,field,value`
//!
//! Dates are ISO `YYYY-MM-DD`. Void or insane bars are dropped with a warning.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::memory::InMemoryStore;
use super::provider::{DataError, Observation};
use crate::domain::Bar;

pub const BARS_FILE: &str = "bars.csv";
pub const FUNDAMENTALS_FILE: &str = "fundamentals.csv";

#[derive(Debug, Deserialize)]
struct FundamentalRow {
    instrument: String,
    date: NaiveDate,
    field: String,
    value: f64,
}

pub struct CsvStore;

impl CsvStore {
    /// Load a data directory into an [`InMemoryStore`].
    pub fn load(dir: &Path) -> Result<InMemoryStore, DataError> {
        let mut store = InMemoryStore::new();

        let bars_path = dir.join(BARS_FILE);
        let mut reader = csv::Reader::from_path(&bars_path)?;
        let mut by_instrument: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        let mut dropped = 0usize;
        for row in reader.deserialize::<Bar>() {
            let bar = row?;
            if !bar.is_sane() {
                dropped += 1;
                warn!(instrument = %bar.instrument, date = %bar.date, "dropping insane bar");
                continue;
            }
            by_instrument.entry(bar.instrument.clone()).or_default().push(bar);
        }
        for (instrument, bars) in by_instrument {
            store.insert_bars(&instrument, bars);
        }

        let fundamentals_path = dir.join(FUNDAMENTALS_FILE);
        let mut series_count = 0usize;
        if fundamentals_path.exists() {
            let mut reader = csv::Reader::from_path(&fundamentals_path)?;
            let mut series: BTreeMap<(String, String), Vec<Observation>> = BTreeMap::new();
            for row in reader.deserialize::<FundamentalRow>() {
                let row = row?;
                series
                    .entry((row.instrument, row.field))
                    .or_default()
                    .push(Observation::new(row.date, row.value));
            }
            series_count = series.len();
            for ((instrument, field), obs) in series {
                store.insert_fundamental(&instrument, &field, obs);
            }
        }

        info!(
            dir = %dir.display(),
            bars = store.bar_count(),
            fundamental_series = series_count,
            dropped,
            "loaded CSV data"
        );
        Ok(store)
    }
}
