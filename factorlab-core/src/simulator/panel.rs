//! Price panel — per-date open/close prices for the simulated universe.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::{DataAccess, DataError};
use crate::domain::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayPrices {
    pub open: f64,
    pub close: f64,
}

/// Prices keyed by date then instrument. Only instruments with a bar on a
/// date appear under it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricePanel {
    days: BTreeMap<NaiveDate, BTreeMap<String, DayPrices>>,
}

impl PricePanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load prices for `instruments` over the trading calendar of `range`.
    ///
    /// Unknown instruments are skipped; other data errors propagate.
    pub fn load(data: &dyn DataAccess, instruments: &[String], range: DateRange) -> Result<Self, DataError> {
        let mut panel = Self::new();
        for date in data.trading_dates(range) {
            panel.days.entry(date).or_default();
        }
        for instrument in instruments {
            let bars = match data.bars(instrument, range.end) {
                Ok(bars) => bars,
                Err(DataError::UnknownInstrument(_)) => continue,
                Err(e) => return Err(e),
            };
            for bar in bars.into_iter().filter(|b| range.contains(b.date)) {
                panel.insert(&bar.instrument, bar.date, bar.open, bar.close);
            }
        }
        Ok(panel)
    }

    pub fn insert(&mut self, instrument: &str, date: NaiveDate, open: f64, close: f64) {
        self.days
            .entry(date)
            .or_default()
            .insert(instrument.to_string(), DayPrices { open, close });
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.days.keys().copied().collect()
    }

    pub fn prices_on(&self, date: NaiveDate) -> Option<&BTreeMap<String, DayPrices>> {
        self.days.get(&date)
    }

    pub fn price(&self, instrument: &str, date: NaiveDate) -> Option<DayPrices> {
        self.days.get(&date)?.get(instrument).copied()
    }

    /// Sub-panel restricted to `range`.
    pub fn slice(&self, range: DateRange) -> Self {
        if range.start > range.end {
            return Self::new();
        }
        Self {
            days: self
                .days
                .range(range.start..=range.end)
                .map(|(d, p)| (*d, p.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
