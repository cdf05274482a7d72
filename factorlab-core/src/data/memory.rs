//! In-memory point-in-time store.
//!
//! Bars and fundamental series are kept sorted by date; every query truncates
//! at `as_of` with a binary search so nothing dated later can leak out.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use super::provider::{DataAccess, DataError, Observation};
use crate::domain::{Bar, DateRange};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    bars: BTreeMap<String, Vec<Bar>>,
    fundamentals: BTreeMap<(String, String), Vec<Observation>>,
    calendar: Vec<NaiveDate>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the bar history of an instrument.
    ///
    /// Bars are sorted by date; duplicate dates keep the last one supplied.
    pub fn insert_bars(&mut self, instrument: &str, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }
        self.bars.insert(instrument.to_string(), deduped);
        self.rebuild_calendar();
    }

    /// Insert (or replace) a fundamental series.
    pub fn insert_fundamental(&mut self, instrument: &str, field: &str, mut series: Vec<Observation>) {
        series.sort_by_key(|o| o.date);
        series.dedup_by_key(|o| o.date);
        self.fundamentals
            .insert((instrument.to_string(), field.to_string()), series);
    }

    pub fn bar_count(&self) -> usize {
        self.bars.values().map(Vec::len).sum()
    }

    fn rebuild_calendar(&mut self) {
        let dates: BTreeSet<NaiveDate> = self
            .bars
            .values()
            .flat_map(|bars| bars.iter().map(|b| b.date))
            .collect();
        self.calendar = dates.into_iter().collect();
    }

    fn bars_until(&self, instrument: &str, as_of: NaiveDate) -> Result<&[Bar], DataError> {
        let bars = self
            .bars
            .get(instrument)
            .ok_or_else(|| DataError::UnknownInstrument(instrument.to_string()))?;
        let end = bars.partition_point(|b| b.date <= as_of);
        Ok(&bars[..end])
    }
}

fn bar_field(bar: &Bar, field: &str) -> Option<f64> {
    match field {
        "open" => Some(bar.open),
        "high" => Some(bar.high),
        "low" => Some(bar.low),
        "close" => Some(bar.close),
        "volume" => Some(bar.volume as f64),
        _ => None,
    }
}

impl DataAccess for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn instruments(&self) -> Vec<String> {
        self.bars.keys().cloned().collect()
    }

    fn bars(&self, instrument: &str, as_of: NaiveDate) -> Result<Vec<Bar>, DataError> {
        Ok(self.bars_until(instrument, as_of)?.to_vec())
    }

    fn recent_bars(
        &self,
        instrument: &str,
        as_of: NaiveDate,
        count: usize,
    ) -> Result<Vec<Bar>, DataError> {
        let bars = self.bars_until(instrument, as_of)?;
        let start = bars.len().saturating_sub(count);
        Ok(bars[start..].to_vec())
    }

    fn get_series(
        &self,
        instrument: &str,
        field: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<Observation>, DataError> {
        if let Some(series) = self
            .fundamentals
            .get(&(instrument.to_string(), field.to_string()))
        {
            let end = series.partition_point(|o| o.date <= as_of);
            return Ok(series[..end].to_vec());
        }
        let bars = self.bars_until(instrument, as_of)?;
        let series: Vec<Observation> = bars
            .iter()
            .filter_map(|b| bar_field(b, field).map(|v| Observation::new(b.date, v)))
            .collect();
        if series.is_empty() {
            return Err(DataError::Missing {
                instrument: instrument.to_string(),
                field: field.to_string(),
                as_of,
            });
        }
        Ok(series)
    }

    fn trading_dates(&self, range: DateRange) -> Vec<NaiveDate> {
        let start = self.calendar.partition_point(|d| *d < range.start);
        let end = self.calendar.partition_point(|d| *d <= range.end);
        self.calendar[start..end.max(start)].to_vec()
    }
}
