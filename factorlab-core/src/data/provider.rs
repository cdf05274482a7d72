//! Point-in-time data access trait and structured error types.
//!
//! The `DataAccess` trait abstracts over data sources (in-memory fixtures,
//! CSV directories, a future remote adapter) so the scoring engine and the
//! simulator never know where bars and fundamentals come from. Every query
//! carries an `as_of` date and implementations must never return an
//! observation dated after it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, DateRange};

/// Bar fields addressable through `get_series`. Any other field name is
/// looked up as a fundamental series.
pub const BAR_FIELDS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// A single dated value of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no '{field}' data for {instrument} as of {as_of}")]
    Missing {
        instrument: String,
        field: String,
        as_of: NaiveDate,
    },

    #[error("look-ahead: '{field}' for {instrument} dated {date} returned for as_of {as_of}")]
    LookAhead {
        instrument: String,
        field: String,
        date: NaiveDate,
        as_of: NaiveDate,
    },

    #[error("stale: latest '{field}' for {instrument} is from {date}, more than {max_days} days before {as_of}")]
    Stale {
        instrument: String,
        field: String,
        date: NaiveDate,
        as_of: NaiveDate,
        max_days: i64,
    },

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("transient data access failure: {0}")]
    Transient(String),

    #[error("data access failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, DataError::Transient(_))
    }

    /// Errors that exclude an instrument for a date rather than abort a run.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            DataError::Missing { .. }
                | DataError::LookAhead { .. }
                | DataError::Stale { .. }
                | DataError::UnknownInstrument(_)
                | DataError::RetriesExhausted { .. }
        )
    }
}

/// Point-in-time access to price bars and fundamental series.
///
/// Implementations must be `Send + Sync`: the optimizer evaluates candidates
/// on a rayon pool that shares one adapter.
pub trait DataAccess: Send + Sync {
    /// Human-readable name of this adapter.
    fn name(&self) -> &str;

    /// All instruments the adapter knows about, sorted.
    fn instruments(&self) -> Vec<String>;

    /// All bars of `instrument` dated on or before `as_of`, oldest first.
    fn bars(&self, instrument: &str, as_of: NaiveDate) -> Result<Vec<Bar>, DataError>;

    /// The last `count` bars dated on or before `as_of`.
    fn recent_bars(
        &self,
        instrument: &str,
        as_of: NaiveDate,
        count: usize,
    ) -> Result<Vec<Bar>, DataError> {
        let mut bars = self.bars(instrument, as_of)?;
        let skip = bars.len().saturating_sub(count);
        Ok(bars.split_off(skip))
    }

    /// Values of `field` for `instrument` dated on or before `as_of`, oldest first.
    ///
    /// `field` is one of [`BAR_FIELDS`] or the name of a fundamental series.
    fn get_series(
        &self,
        instrument: &str,
        field: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<Observation>, DataError>;

    /// Every date inside `range` on which at least one instrument has a bar.
    fn trading_dates(&self, range: DateRange) -> Vec<NaiveDate>;
}

/// Reject observations dated after `as_of`.
///
/// Adapters are trusted to truncate, but the scoring engine re-checks every
/// value it consumes.
pub fn ensure_point_in_time(
    instrument: &str,
    field: &str,
    observations: &[Observation],
    as_of: NaiveDate,
) -> Result<(), DataError> {
    match observations.iter().find(|o| o.date > as_of) {
        Some(o) => Err(DataError::LookAhead {
            instrument: instrument.to_string(),
            field: field.to_string(),
            date: o.date,
            as_of,
        }),
        None => Ok(()),
    }
}

/// Latest observation of a series, rejecting look-ahead and stale values.
pub fn latest_fresh(
    instrument: &str,
    field: &str,
    observations: &[Observation],
    as_of: NaiveDate,
    max_staleness_days: Option<i64>,
) -> Result<Observation, DataError> {
    ensure_point_in_time(instrument, field, observations, as_of)?;
    let latest = observations
        .iter()
        .rev()
        .find(|o| o.value.is_finite())
        .copied()
        .ok_or_else(|| DataError::Missing {
            instrument: instrument.to_string(),
            field: field.to_string(),
            as_of,
        })?;
    if let Some(max_days) = max_staleness_days {
        if (as_of - latest.date).num_days() > max_days {
            return Err(DataError::Stale {
                instrument: instrument.to_string(),
                field: field.to_string(),
                date: latest.date,
                as_of,
                max_days,
            });
        }
    }
    Ok(latest)
}
