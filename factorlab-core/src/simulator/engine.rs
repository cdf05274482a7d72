//! Day-by-day portfolio simulator.
//!
//! Four phases per trading day:
//! 1. Fill orders decided on an earlier day at the configured next price
//! 2. Mark to market at the close, update the running peak
//! 3. Exit rules: stop-loss, drawdown control, holding horizon
//! 4. Rebalance: turn the ranked list into entry (and top-up) orders
//!
//! Risk exits fill at the triggering close. Everything driven by a ranking,
//! and horizon exits, fill on a later day so no decision trades on the
//! prices it was derived from.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

use super::panel::{DayPrices, PricePanel};
use super::rules::SimulationRules;
use crate::domain::{
    Holding, ParameterSet, ParamsError, PortfolioState, TradeAction, TradeReason, TradeRecord,
};
use crate::scoring::Ranking;

/// An order decided on one day and filled on a later one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub instrument: String,
    pub action: TradeAction,
    pub reason: TradeReason,
    pub decided_on: NaiveDate,
    /// Cash earmarked for entries and top-ups.
    #[serde(default)]
    pub allocation: f64,
}

/// Everything that carries from one day to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub portfolio: PortfolioState,
    pub pending: Vec<PendingOrder>,
    /// Trading days processed so far; drives the rebalance cadence.
    pub days_processed: usize,
}

impl SimulationState {
    pub fn new(capital: f64) -> Self {
        Self {
            portfolio: PortfolioState::new(capital),
            pending: Vec::new(),
            days_processed: 0,
        }
    }

    fn has_pending(&self, instrument: &str, action: TradeAction) -> bool {
        self.pending
            .iter()
            .any(|o| o.instrument == instrument && o.action == action)
    }

    fn committed_cash(&self) -> f64 {
        self.pending
            .iter()
            .filter(|o| o.action != TradeAction::Exit)
            .map(|o| o.allocation)
            .sum()
    }
}

/// End-of-day mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMark {
    pub date: NaiveDate,
    pub cash: f64,
    pub position_value: f64,
    pub value: f64,
    pub peak_value: f64,
    pub holdings: usize,
}

/// Result of one `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayOutcome {
    pub mark: DailyMark,
    pub trades: Vec<TradeRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub trajectory: Vec<DailyMark>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<f64>,
    pub initial_capital: f64,
}

impl SimulationResult {
    pub fn final_value(&self) -> f64 {
        self.equity_curve.last().copied().unwrap_or(self.initial_capital)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("invalid parameter set: {0}")]
    Params(#[from] ParamsError),
    #[error("invalid simulation rules: {0}")]
    Rules(String),
    #[error("initial capital must be positive, got {0}")]
    Capital(f64),
    #[error("day {date} is not after the last simulated day {last}")]
    OutOfOrder { date: NaiveDate, last: NaiveDate },
}

// ─── Simulator ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Simulator {
    params: ParameterSet,
    rules: SimulationRules,
}

impl Simulator {
    pub fn new(params: ParameterSet, rules: SimulationRules) -> Result<Self, SimulationError> {
        params.validate()?;
        rules.validate().map_err(SimulationError::Rules)?;
        Ok(Self { params, rules })
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn rules(&self) -> &SimulationRules {
        &self.rules
    }

    /// Simulate every day of `panel`, rebalancing from `rankings` on
    /// rebalance days that have a ranking.
    pub fn simulate(
        &self,
        rankings: &BTreeMap<NaiveDate, Ranking>,
        panel: &PricePanel,
        capital: f64,
    ) -> Result<SimulationResult, SimulationError> {
        if !(capital.is_finite() && capital > 0.0) {
            return Err(SimulationError::Capital(capital));
        }
        let mut state = SimulationState::new(capital);
        let mut result = SimulationResult {
            initial_capital: capital,
            ..SimulationResult::default()
        };
        let empty = BTreeMap::new();
        for date in panel.dates() {
            let prices = panel.prices_on(date).unwrap_or(&empty);
            let outcome = self.step(&mut state, date, prices, rankings.get(&date))?;
            result.equity_curve.push(outcome.mark.value);
            result.trajectory.push(outcome.mark);
            result.trades.extend(outcome.trades);
        }
        debug!(
            days = result.equity_curve.len(),
            trades = result.trades.len(),
            final_value = result.final_value(),
            "simulation complete"
        );
        Ok(result)
    }

    /// Advance `state` by exactly one trading day.
    pub fn step(
        &self,
        state: &mut SimulationState,
        date: NaiveDate,
        prices: &BTreeMap<String, DayPrices>,
        ranking: Option<&Ranking>,
    ) -> Result<DayOutcome, SimulationError> {
        if let Some(last) = state.portfolio.as_of_date {
            if date <= last {
                return Err(SimulationError::OutOfOrder { date, last });
            }
        }
        let mut trades = Vec::new();

        // ─── Phase 1: fill pending orders ───
        self.fill_pending(state, date, prices, &mut trades);

        // ─── Phase 2: mark to market ───
        let closes: BTreeMap<String, f64> = prices
            .iter()
            .map(|(sym, p)| (sym.clone(), p.close))
            .collect();
        for (sym, close) in &closes {
            state.portfolio.last_prices.insert(sym.clone(), *close);
        }
        for holding in state.portfolio.positions.values_mut() {
            holding.days_held += 1;
        }
        let value = state.portfolio.total_value(&closes);
        state.portfolio.update_peak(value);

        // ─── Phase 3: exit rules ───
        self.apply_stop_losses(state, date, &closes, &mut trades);
        self.apply_drawdown_control(state, date, &closes, &mut trades);
        self.schedule_horizon_exits(state, date);

        // ─── Phase 4: rebalance ───
        let is_rebalance_day = state.days_processed % self.rules.rebalance_every == 0;
        if let Some(ranking) = ranking.filter(|_| is_rebalance_day) {
            self.schedule_entries(state, date, &closes, ranking);
        }

        state.days_processed += 1;
        state.portfolio.as_of_date = Some(date);
        let position_value = state.portfolio.position_value(&closes);
        let mark = DailyMark {
            date,
            cash: state.portfolio.cash,
            position_value,
            value: state.portfolio.cash + position_value,
            peak_value: state.portfolio.peak_value,
            holdings: state.portfolio.positions.len(),
        };
        Ok(DayOutcome { mark, trades })
    }

    fn commission(&self, notional: f64) -> f64 {
        notional * self.rules.commission_rate
    }

    fn fill_pending(
        &self,
        state: &mut SimulationState,
        date: NaiveDate,
        prices: &BTreeMap<String, DayPrices>,
        trades: &mut Vec<TradeRecord>,
    ) {
        // Exits first so their proceeds are available to entries.
        let mut orders = std::mem::take(&mut state.pending);
        orders.sort_by_key(|o| match o.action {
            TradeAction::Exit => 0,
            TradeAction::Enter => 1,
            TradeAction::Add => 2,
        });

        let mut still_pending = Vec::new();
        for order in orders {
            if order.decided_on >= date {
                still_pending.push(order);
                continue;
            }
            let price = match prices.get(&order.instrument) {
                Some(p) => self.rules.fill_price.pick(p),
                None => {
                    still_pending.push(order);
                    continue;
                }
            };
            let trade = match order.action {
                TradeAction::Exit => self.sell(state, &order.instrument, date, price, 1.0, order.reason),
                TradeAction::Enter | TradeAction::Add => self.buy(state, &order, date, price),
            };
            trades.extend(trade);
        }
        state.pending = still_pending;
    }

    fn buy(
        &self,
        state: &mut SimulationState,
        order: &PendingOrder,
        date: NaiveDate,
        price: f64,
    ) -> Option<TradeRecord> {
        let budget = order.allocation.min(state.portfolio.cash);
        if budget <= 0.0 || price <= 0.0 {
            return None;
        }
        let shares = self
            .rules
            .round_shares(budget / (price * (1.0 + self.rules.commission_rate)));
        if shares <= 0.0 {
            return None;
        }
        let notional = shares * price;
        let commission = self.commission(notional);
        state.portfolio.cash -= notional + commission;

        let action = match state.portfolio.positions.get_mut(&order.instrument) {
            Some(holding) => {
                let total = holding.shares + shares;
                holding.entry_price = (holding.entry_price * holding.shares + price * shares) / total;
                holding.shares = total;
                TradeAction::Add
            }
            None => {
                state.portfolio.positions.insert(
                    order.instrument.clone(),
                    Holding {
                        entry_price: price,
                        shares,
                        entry_date: date,
                        days_held: 0,
                    },
                );
                TradeAction::Enter
            }
        };
        Some(TradeRecord {
            instrument: order.instrument.clone(),
            action,
            date,
            price,
            shares,
            reason: order.reason,
            entry_price: None,
            realized_pnl: None,
            commission,
        })
    }

    /// Sell `fraction` of a holding at `price`. A fraction of 1.0 closes it.
    fn sell(
        &self,
        state: &mut SimulationState,
        instrument: &str,
        date: NaiveDate,
        price: f64,
        fraction: f64,
        reason: TradeReason,
    ) -> Option<TradeRecord> {
        let holding = state.portfolio.positions.get(instrument)?.clone();
        let shares = if fraction >= 1.0 {
            holding.shares
        } else {
            self.rules.round_shares(holding.shares * fraction)
        };
        if shares <= 0.0 {
            return None;
        }
        let notional = shares * price;
        let commission = self.commission(notional);
        state.portfolio.cash += notional - commission;

        let remaining = holding.shares - shares;
        if remaining <= 1e-9 {
            state.portfolio.positions.remove(instrument);
            state.pending.retain(|o| o.instrument != instrument || o.action != TradeAction::Exit);
        } else if let Some(h) = state.portfolio.positions.get_mut(instrument) {
            h.shares = remaining;
        }

        Some(TradeRecord {
            instrument: instrument.to_string(),
            action: TradeAction::Exit,
            date,
            price,
            shares,
            reason,
            entry_price: Some(holding.entry_price),
            realized_pnl: Some((price - holding.entry_price) * shares - commission),
            commission,
        })
    }

    fn apply_stop_losses(
        &self,
        state: &mut SimulationState,
        date: NaiveDate,
        closes: &BTreeMap<String, f64>,
        trades: &mut Vec<TradeRecord>,
    ) {
        let threshold = 1.0 - self.params.stop_loss_pct;
        let triggered: Vec<(String, f64)> = state
            .portfolio
            .positions
            .iter()
            .filter_map(|(sym, h)| {
                let close = *closes.get(sym)?;
                (close <= h.entry_price * threshold).then(|| (sym.clone(), close))
            })
            .collect();
        for (sym, close) in triggered {
            debug!(instrument = %sym, %date, close, "stop-loss triggered");
            trades.extend(self.sell(state, &sym, date, close, 1.0, TradeReason::StopLoss));
        }
    }

    /// Sell `drawdown_reduction` of every holding once value falls to the
    /// drawdown floor, then restart the peak from the reduced value.
    ///
    /// With a lot size the sold shares are floored to whole lots, so the cut
    /// can fall short of the configured fraction. When no holding yields a
    /// single lot nothing is sold and the peak is kept.
    fn apply_drawdown_control(
        &self,
        state: &mut SimulationState,
        date: NaiveDate,
        closes: &BTreeMap<String, f64>,
        trades: &mut Vec<TradeRecord>,
    ) {
        if state.portfolio.positions.is_empty() {
            return;
        }
        let value = state.portfolio.total_value(closes);
        let floor = state.portfolio.peak_value * (1.0 - self.params.drawdown_control_pct);
        if value > floor {
            return;
        }
        debug!(%date, value, peak = state.portfolio.peak_value, "drawdown control triggered");
        let marks: Vec<(String, f64)> = state
            .portfolio
            .positions
            .keys()
            .filter_map(|sym| {
                state
                    .portfolio
                    .mark_price(sym, closes)
                    .map(|p| (sym.clone(), p))
            })
            .collect();
        let before = trades.len();
        for (sym, price) in marks {
            trades.extend(self.sell(
                state,
                &sym,
                date,
                price,
                self.rules.drawdown_reduction,
                TradeReason::DrawdownControl,
            ));
        }
        if trades.len() > before {
            state.portfolio.peak_value = state.portfolio.total_value(closes);
        } else {
            debug!(%date, "drawdown reduction below one lot; peak kept");
        }
    }

    fn schedule_horizon_exits(&self, state: &mut SimulationState, date: NaiveDate) {
        let expired: Vec<String> = state
            .portfolio
            .positions
            .iter()
            .filter(|(_, h)| h.days_held > self.rules.horizon_days)
            .map(|(sym, _)| sym.clone())
            .collect();
        for sym in expired {
            if !state.has_pending(&sym, TradeAction::Exit) {
                state.pending.push(PendingOrder {
                    instrument: sym,
                    action: TradeAction::Exit,
                    reason: TradeReason::HorizonExit,
                    decided_on: date,
                    allocation: 0.0,
                });
            }
        }
    }

    fn schedule_entries(
        &self,
        state: &mut SimulationState,
        date: NaiveDate,
        closes: &BTreeMap<String, f64>,
        ranking: &Ranking,
    ) {
        let target = ranking.top(self.params.position_count);
        let exiting: BTreeSet<String> = state
            .pending
            .iter()
            .filter(|o| o.action == TradeAction::Exit)
            .map(|o| o.instrument.clone())
            .collect();
        let occupied = state
            .portfolio
            .positions
            .keys()
            .filter(|sym| !exiting.contains(*sym))
            .count()
            + state
                .pending
                .iter()
                .filter(|o| o.action == TradeAction::Enter)
                .count();
        let mut open_slots = self.params.position_count.saturating_sub(occupied);
        let mut uncommitted = (state.portfolio.cash - state.committed_cash()).max(0.0);

        for sym in &target {
            if open_slots == 0 || uncommitted <= 0.0 {
                break;
            }
            if state.portfolio.holds(sym) || state.has_pending(sym, TradeAction::Enter) {
                continue;
            }
            let allocation = uncommitted / open_slots as f64;
            state.pending.push(PendingOrder {
                instrument: sym.clone(),
                action: TradeAction::Enter,
                reason: TradeReason::Selection,
                decided_on: date,
                allocation,
            });
            uncommitted -= allocation;
            open_slots -= 1;
        }

        if let Some(threshold) = self.rules.top_up_threshold {
            let value = state.portfolio.total_value(closes);
            let target_weight = 1.0 / self.params.position_count as f64;
            for sym in &target {
                if uncommitted <= 0.0 || exiting.contains(sym) || state.has_pending(sym, TradeAction::Add) {
                    continue;
                }
                let holding_value = match state.portfolio.positions.get(sym) {
                    Some(h) => h.market_value(state.portfolio.mark_price(sym, closes).unwrap_or(0.0)),
                    None => continue,
                };
                if value <= 0.0 || holding_value / value >= target_weight * (1.0 - threshold) {
                    continue;
                }
                let allocation = (target_weight * value - holding_value).min(uncommitted);
                state.pending.push(PendingOrder {
                    instrument: sym.clone(),
                    action: TradeAction::Add,
                    reason: TradeReason::Selection,
                    decided_on: date,
                    allocation,
                });
                uncommitted -= allocation;
            }
        }
    }
}

/// Pending orders scheduled for the next period.
pub fn pending_actions(state: &SimulationState) -> &[PendingOrder] {
    &state.pending
}
