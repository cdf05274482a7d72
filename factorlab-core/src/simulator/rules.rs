//! Simulation rules that are not part of the optimized parameter set.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::panel::DayPrices;

/// Which price a scheduled order fills at on the next trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPrice {
    #[default]
    NextOpen,
    NextClose,
}

impl FillPrice {
    pub fn pick(self, prices: &DayPrices) -> f64 {
        match self {
            FillPrice::NextOpen => prices.open,
            FillPrice::NextClose => prices.close,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationRules {
    /// Rebalance every N trading days (1 = every day).
    pub rebalance_every: usize,
    /// Positions held longer than this many trading days are exited.
    pub horizon_days: usize,
    /// Fraction of every position sold when drawdown control triggers.
    pub drawdown_reduction: f64,
    /// Commission as a fraction of notional, charged on every fill.
    pub commission_rate: f64,
    /// Round share counts down to whole lots (e.g. 100-share board lots).
    pub lot_size: Option<u32>,
    pub fill_price: FillPrice,
    /// Top up held targets whose weight fell below target × (1 − threshold).
    pub top_up_threshold: Option<f64>,
}

impl Default for SimulationRules {
    fn default() -> Self {
        Self {
            rebalance_every: 5,
            horizon_days: 5,
            drawdown_reduction: 0.5,
            commission_rate: 0.0,
            lot_size: None,
            fill_price: FillPrice::NextOpen,
            top_up_threshold: None,
        }
    }
}

impl SimulationRules {
    pub fn validate(&self) -> Result<(), String> {
        if self.rebalance_every == 0 {
            return Err("rebalance_every must be at least 1".into());
        }
        if self.horizon_days == 0 {
            return Err("horizon_days must be at least 1".into());
        }
        if !(self.drawdown_reduction > 0.0 && self.drawdown_reduction <= 1.0) {
            return Err(format!(
                "drawdown_reduction must be in (0, 1], got {}",
                self.drawdown_reduction
            ));
        }
        if !(0.0..0.1).contains(&self.commission_rate) {
            return Err(format!(
                "commission_rate must be in [0, 0.1), got {}",
                self.commission_rate
            ));
        }
        if self.lot_size == Some(0) {
            return Err("lot_size must be positive".into());
        }
        if let Some(t) = self.top_up_threshold {
            if !(0.0..1.0).contains(&t) {
                return Err(format!("top_up_threshold must be in [0, 1), got {t}"));
            }
        }
        Ok(())
    }

    /// Floor `shares` to whole lots when a lot size is configured.
    pub fn round_shares(&self, shares: f64) -> f64 {
        match self.lot_size {
            Some(lot) if lot > 0 => {
                let lot = lot as f64;
                (shares / lot).floor() * lot
            }
            _ => shares,
        }
    }

    /// Dates on which ranking-driven rebalancing happens.
    pub fn rebalance_dates(&self, dates: &[NaiveDate]) -> Vec<NaiveDate> {
        let every = self.rebalance_every.max(1);
        dates.iter().step_by(every).copied().collect()
    }
}
