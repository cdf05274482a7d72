//! TradeRecord — one append-only entry of the trade log.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Enter,
    Add,
    Exit,
}

/// Why a trade happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    Selection,
    StopLoss,
    DrawdownControl,
    HorizonExit,
}

impl fmt::Display for TradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeReason::Selection => "selection",
            TradeReason::StopLoss => "stop_loss",
            TradeReason::DrawdownControl => "drawdown_control",
            TradeReason::HorizonExit => "horizon_exit",
        };
        f.write_str(s)
    }
}

/// A single fill.
///
/// `date`/`price` are the execution date and price, which for ranking-driven
/// trades is the first available price after the decision date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub instrument: String,
    pub action: TradeAction,
    pub date: NaiveDate,
    pub price: f64,
    pub shares: f64,
    pub reason: TradeReason,
    /// Entry price of the position the exit closed (exits only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    /// Realized P&L net of this fill's commission (exits only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub commission: f64,
}

impl TradeRecord {
    /// Notional value of the fill.
    pub fn notional(&self) -> f64 {
        self.price * self.shares
    }

    pub fn is_exit(&self) -> bool {
        self.action == TradeAction::Exit
    }

    pub fn is_winner(&self) -> bool {
        self.realized_pnl.is_some_and(|p| p > 0.0)
    }
}
