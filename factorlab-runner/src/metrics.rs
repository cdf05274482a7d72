//! Performance metrics — pure functions that compute strategy statistics.
//!
//! Every metric is a pure function: equity curve and/or trade list in, scalar out.
//! Max drawdown is reported as a positive fraction (0.12 = 12% below peak).

use serde::{Deserialize, Serialize};
use factorlab_core::domain::TradeRecord;
use factorlab_core::simulator::SimulationResult;

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Aggregate metrics of one simulated range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    #[serde(rename = "return")]
    pub total_return: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    #[serde(default)]
    pub cagr: f64,
    #[serde(default)]
    pub trade_count: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics from an equity curve and trade list.
    ///
    /// The initial capital is prepended to the curve so the first day's
    /// move counts toward return, Sharpe and drawdown.
    pub fn compute(equity_curve: &[f64], trades: &[TradeRecord], initial_capital: f64) -> Self {
        let mut curve = Vec::with_capacity(equity_curve.len() + 1);
        if initial_capital > 0.0 {
            curve.push(initial_capital);
        }
        curve.extend_from_slice(equity_curve);
        Self {
            total_return: total_return(&curve),
            sharpe: sharpe_ratio(&curve, 0.0),
            max_drawdown: max_drawdown(&curve),
            win_rate: win_rate(trades),
            cagr: cagr(&curve, equity_curve.len()),
            trade_count: trades.len(),
        }
    }

    pub fn from_result(result: &SimulationResult) -> Self {
        Self::compute(&result.equity_curve, &result.trades, result.initial_capital)
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(&initial), Some(&final_eq)) if equity_curve.len() >= 2 && initial > 0.0 => {
            (final_eq - initial) / initial
        }
        _ => 0.0,
    }
}

/// Compound Annual Growth Rate.
///
/// Assumes 252 trading days per year. Returns 0.0 for single-bar or non-positive equity.
pub fn cagr(equity_curve: &[f64], trading_days: usize) -> f64 {
    if equity_curve.len() < 2 || trading_days < 2 {
        return 0.0;
    }
    let initial = equity_curve[0];
    let final_eq = equity_curve[equity_curve.len() - 1];
    if initial <= 0.0 || final_eq <= 0.0 {
        return 0.0;
    }
    let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;
    (final_eq / initial).powf(1.0 / years) - 1.0
}

/// Annualized Sharpe ratio from daily returns.
///
/// Sharpe = mean(daily returns - rf) / std(daily returns) * sqrt(252).
/// Returns 0.0 if variance is zero or fewer than 2 returns.
pub fn sharpe_ratio(equity_curve: &[f64], risk_free_rate: f64) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let mean = mean_f64(&excess);
    let std = std_dev(&excess);
    if std < 1e-15 {
        return 0.0;
    }
    (mean / std) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Maximum drawdown as a positive fraction of the running peak.
///
/// Returns 0.0 if equity is constant or monotonically increasing.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - eq) / peak);
        }
    }
    max_dd
}

/// Fraction of exits with positive realized P&L.
///
/// Only exits carrying a realized P&L count; entries and top-ups are ignored.
pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    let closed: Vec<&TradeRecord> = trades
        .iter()
        .filter(|t| t.is_exit() && t.realized_pnl.is_some())
        .collect();
    if closed.is_empty() {
        return 0.0;
    }
    let winners = closed.iter().filter(|t| t.is_winner()).count();
    winners as f64 / closed.len() as f64
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Compute daily returns from an equity curve.
pub fn daily_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1).
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use factorlab_core::domain::{TradeAction, TradeReason};

    fn exit(pnl: Option<f64>) -> TradeRecord {
        TradeRecord {
            instrument: "600000".into(),
            action: TradeAction::Exit,
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            price: 10.0,
            shares: 100.0,
            reason: TradeReason::HorizonExit,
            entry_price: Some(9.0),
            realized_pnl: pnl,
            commission: 0.0,
        }
    }

    #[test]
    fn total_return_positive() {
        assert!((total_return(&[100.0, 110.0, 120.0]) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn total_return_single_bar() {
        assert_eq!(total_return(&[100.0]), 0.0);
        assert_eq!(total_return(&[]), 0.0);
    }

    #[test]
    fn cagr_one_year() {
        let mut curve = vec![100.0; 253];
        curve[252] = 110.0;
        assert!((cagr(&curve, 252) - 0.10).abs() < 1e-9);
    }

    #[test]
    fn cagr_constant_equity() {
        assert_eq!(cagr(&[100.0, 100.0, 100.0], 3), 0.0);
    }

    #[test]
    fn sharpe_zero_for_constant_curve() {
        assert_eq!(sharpe_ratio(&[100.0; 10], 0.0), 0.0);
    }

    #[test]
    fn sharpe_positive_for_rising_noisy_curve() {
        let curve = [100.0, 101.0, 101.5, 102.8, 103.0, 104.1];
        assert!(sharpe_ratio(&curve, 0.0) > 0.0);
    }

    #[test]
    fn max_drawdown_is_positive_fraction() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd - 0.25).abs() < 1e-12);
    }

    #[test]
    fn max_drawdown_monotonic_is_zero() {
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn win_rate_counts_only_closed_exits() {
        let mut entry = exit(None);
        entry.action = TradeAction::Enter;
        let trades = vec![entry, exit(Some(5.0)), exit(Some(-2.0)), exit(Some(1.0))];
        assert!((win_rate(&trades) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(win_rate(&[]), 0.0);
    }

    #[test]
    fn compute_includes_first_day_move() {
        let m = PerformanceMetrics::compute(&[90.0, 95.0], &[], 100.0);
        assert!((m.total_return + 0.05).abs() < 1e-12);
        assert!((m.max_drawdown - 0.10).abs() < 1e-12);
        assert_eq!(m.trade_count, 0);
    }

    #[test]
    fn metrics_serialize_return_field_name() {
        let json = serde_json::to_string(&PerformanceMetrics::default()).unwrap();
        assert!(json.contains("\"return\""));
        assert!(json.contains("\"max_drawdown\""));
    }
}
