//! PortfolioState — cash, open holdings and the drawdown peak.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub entry_price: f64,
    pub shares: f64,
    pub entry_date: NaiveDate,
    /// Trading days the position has been held (incremented at each close).
    #[serde(default)]
    pub days_held: usize,
}

impl Holding {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn unrealized_return(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price
    }
}

/// Aggregate portfolio state.
///
/// The accounting identity `value == cash + sum(holding market values)` holds
/// at every mark. `peak_value` is a running maximum of marked value that only
/// moves down when drawdown control resets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub as_of_date: Option<NaiveDate>,
    pub cash: f64,
    pub positions: BTreeMap<String, Holding>,
    pub peak_value: f64,
    /// Last observed close per instrument, used when a holding has no bar today.
    #[serde(default)]
    pub last_prices: BTreeMap<String, f64>,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            as_of_date: None,
            cash: initial_capital,
            positions: BTreeMap::new(),
            peak_value: initial_capital,
            last_prices: BTreeMap::new(),
        }
    }

    pub fn holds(&self, instrument: &str) -> bool {
        self.positions.get(instrument).is_some_and(|h| h.shares > 0.0)
    }

    /// Price used to mark a holding: today's price, else the last seen close,
    /// else the entry price.
    pub fn mark_price(&self, instrument: &str, prices: &BTreeMap<String, f64>) -> Option<f64> {
        prices
            .get(instrument)
            .or_else(|| self.last_prices.get(instrument))
            .copied()
            .or_else(|| self.positions.get(instrument).map(|h| h.entry_price))
    }

    /// Market value of all open positions.
    pub fn position_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.positions
            .iter()
            .map(|(sym, h)| h.market_value(self.mark_price(sym, prices).unwrap_or(0.0)))
            .sum()
    }

    /// Total value = cash + position value.
    pub fn total_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.cash + self.position_value(prices)
    }

    /// Raise the peak to `value` if it is a new high.
    pub fn update_peak(&mut self, value: f64) {
        if value > self.peak_value {
            self.peak_value = value;
        }
    }

    /// Current drawdown from peak as a positive fraction.
    pub fn drawdown(&self, value: f64) -> f64 {
        if self.peak_value <= 0.0 {
            return 0.0;
        }
        ((self.peak_value - value) / self.peak_value).max(0.0)
    }
}
