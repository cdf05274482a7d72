//! Paper portfolio tracker — one simulator step per invocation, persisted as JSON.
//!
//! State is written atomically after every successful advance. Re-advancing
//! the same date with the same ranking (by digest) is a no-op that returns
//! the stored result, so a scheduler may safely retry.
//!
//! The trade log append happens after the state write. Until it succeeds the
//! state carries `trades_logged = false`, and the next replay of that date
//! appends the stored trades before returning.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::report::write_atomic;
use crate::trade_log::TradeLog;
use factorlab_core::domain::{PortfolioState, TradeRecord};
use factorlab_core::scoring::Ranking;
use factorlab_core::simulator::{
    pending_actions, DailyMark, DayPrices, PendingOrder, SimulationError, SimulationState, Simulator,
};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("portfolio already advanced to {date} with a different ranking")]
    AlreadyAdvanced { date: NaiveDate },
    #[error("{today} is before the portfolio's as-of date {as_of}")]
    OutOfOrder { today: NaiveDate, as_of: NaiveDate },
    #[error("ranking is dated {ranking}, expected {today}")]
    RankingDate { ranking: NaiveDate, today: NaiveDate },
    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("tracker I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt tracker state {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything persisted between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub sim: SimulationState,
    /// Digest of the ranking used for the last advance.
    pub last_digest: Option<String>,
    pub last_trades: Vec<TradeRecord>,
    pub last_mark: Option<DailyMark>,
    /// Whether `last_trades` reached the trade log.
    #[serde(default = "logged_by_default")]
    pub trades_logged: bool,
}

fn logged_by_default() -> bool {
    true
}

impl TrackerState {
    pub fn new(capital: f64) -> Self {
        Self {
            sim: SimulationState::new(capital),
            last_digest: None,
            last_trades: Vec::new(),
            last_mark: None,
            trades_logged: true,
        }
    }
}

/// Result of one `advance`.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub trades: Vec<TradeRecord>,
    pub state: PortfolioState,
    /// True when the call replayed an already stored advance.
    pub replayed: bool,
}

pub struct PortfolioTracker {
    path: PathBuf,
    simulator: Simulator,
    trade_log: TradeLog,
    state: TrackerState,
}

impl PortfolioTracker {
    /// Load persisted state from `path`, or start fresh with `capital`.
    pub fn open(
        path: impl Into<PathBuf>,
        simulator: Simulator,
        trade_log: TradeLog,
        capital: f64,
    ) -> Result<Self, TrackerError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| TrackerError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => TrackerState::new(capital),
            Err(source) => return Err(TrackerError::Io { path, source }),
        };
        Ok(Self {
            path,
            simulator,
            trade_log,
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.state.sim.portfolio
    }

    pub fn last_mark(&self) -> Option<&DailyMark> {
        self.state.last_mark.as_ref()
    }

    /// Orders scheduled to fill on the next period.
    pub fn pending_actions(&self) -> &[PendingOrder] {
        pending_actions(&self.state.sim)
    }

    /// Advance exactly one period to `today`.
    pub fn advance(
        &mut self,
        today: NaiveDate,
        ranking: &Ranking,
        prices: &BTreeMap<String, DayPrices>,
    ) -> Result<Advance, TrackerError> {
        if ranking.date != today {
            return Err(TrackerError::RankingDate {
                ranking: ranking.date,
                today,
            });
        }
        let digest = ranking.digest();
        if let Some(as_of) = self.state.sim.portfolio.as_of_date {
            if today < as_of {
                return Err(TrackerError::OutOfOrder { today, as_of });
            }
            if today == as_of {
                if self.state.last_digest.as_deref() == Some(digest.as_str()) {
                    if !self.state.trades_logged {
                        info!(
                            date = %today,
                            trades = self.state.last_trades.len(),
                            "logging trades left over from an earlier attempt"
                        );
                        self.log_last_trades()?;
                    }
                    return Ok(Advance {
                        trades: self.state.last_trades.clone(),
                        state: self.state.sim.portfolio.clone(),
                        replayed: true,
                    });
                }
                return Err(TrackerError::AlreadyAdvanced { date: today });
            }
        }

        let mut next = self.state.clone();
        let outcome = self
            .simulator
            .step(&mut next.sim, today, prices, Some(ranking))?;
        next.last_digest = Some(digest);
        next.last_trades = outcome.trades.clone();
        next.last_mark = Some(outcome.mark.clone());
        next.trades_logged = outcome.trades.is_empty();

        self.persist(&next)?;
        self.state = next;
        if !self.state.trades_logged {
            self.log_last_trades()?;
        }

        info!(
            date = %today,
            trades = outcome.trades.len(),
            value = outcome.mark.value,
            holdings = outcome.mark.holdings,
            pending = self.state.sim.pending.len(),
            "portfolio advanced"
        );
        Ok(Advance {
            trades: outcome.trades,
            state: self.state.sim.portfolio.clone(),
            replayed: false,
        })
    }

    /// Append `last_trades` to the trade log and record that it happened.
    fn log_last_trades(&mut self) -> Result<(), TrackerError> {
        self.trade_log
            .append(&self.state.last_trades)
            .map_err(|source| TrackerError::Io {
                path: self.trade_log.path().to_path_buf(),
                source,
            })?;
        self.state.trades_logged = true;
        self.persist(&self.state)
    }

    fn persist(&self, state: &TrackerState) -> Result<(), TrackerError> {
        let json = serde_json::to_string_pretty(state).map_err(|source| TrackerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, json.as_bytes()).map_err(|source| TrackerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorlab_core::domain::{ParameterSet, RankScore, TradeAction};
    use factorlab_core::simulator::SimulationRules;
    use tempfile::TempDir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    fn simulator() -> Simulator {
        let params = ParameterSet::new([("pe".to_string(), 1.0)].into_iter().collect(), 1, 0.08, 0.2)
            .unwrap();
        let rules = SimulationRules {
            rebalance_every: 1,
            ..SimulationRules::default()
        };
        Simulator::new(params, rules).unwrap()
    }

    fn ranking(date: NaiveDate, top: &str) -> Ranking {
        Ranking {
            date,
            scores: vec![RankScore {
                instrument: top.into(),
                date,
                ranks: BTreeMap::new(),
                composite: 1.0,
            }],
            exclusions: Vec::new(),
        }
    }

    fn prices(close: f64) -> BTreeMap<String, DayPrices> {
        [
            ("A".to_string(), DayPrices { open: close, close }),
            ("B".to_string(), DayPrices { open: close, close }),
        ]
        .into_iter()
        .collect()
    }

    fn tracker(dir: &TempDir) -> PortfolioTracker {
        PortfolioTracker::open(
            dir.path().join("portfolio.json"),
            simulator(),
            TradeLog::new(dir.path().join("trades.jsonl"), "live"),
            10_000.0,
        )
        .unwrap()
    }

    #[test]
    fn same_date_same_ranking_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.advance(d(1), &ranking(d(1), "A"), &prices(10.0)).unwrap();
        let first = t.advance(d(2), &ranking(d(2), "A"), &prices(10.0)).unwrap();
        assert!(first.trades.iter().any(|tr| tr.action == TradeAction::Enter));
        let state_before = fs::read_to_string(t.path()).unwrap();

        let again = t.advance(d(2), &ranking(d(2), "A"), &prices(10.0)).unwrap();
        assert!(again.replayed);
        assert_eq!(again.trades, first.trades);
        assert_eq!(again.state, first.state);
        assert_eq!(fs::read_to_string(t.path()).unwrap(), state_before);
        // Trades were logged once.
        let logged = TradeLog::new(dir.path().join("trades.jsonl"), "live").read_run().unwrap();
        assert_eq!(logged.len(), first.trades.len());
    }

    #[test]
    fn same_date_different_ranking_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.advance(d(1), &ranking(d(1), "A"), &prices(10.0)).unwrap();
        let err = t.advance(d(1), &ranking(d(1), "B"), &prices(10.0)).unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyAdvanced { date } if date == d(1)));
    }

    #[test]
    fn earlier_date_is_out_of_order() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.advance(d(5), &ranking(d(5), "A"), &prices(10.0)).unwrap();
        let err = t.advance(d(4), &ranking(d(4), "A"), &prices(10.0)).unwrap_err();
        assert!(matches!(err, TrackerError::OutOfOrder { .. }));
    }

    #[test]
    fn state_survives_reopen_and_reports_pending() {
        let dir = TempDir::new().unwrap();
        {
            let mut t = tracker(&dir);
            t.advance(d(1), &ranking(d(1), "A"), &prices(10.0)).unwrap();
            assert_eq!(t.pending_actions().len(), 1);
            assert_eq!(t.pending_actions()[0].instrument, "A");
        }
        let mut reopened = tracker(&dir);
        assert_eq!(reopened.portfolio().as_of_date, Some(d(1)));
        assert_eq!(reopened.pending_actions().len(), 1);
        let adv = reopened.advance(d(2), &ranking(d(2), "A"), &prices(10.0)).unwrap();
        assert!(adv.state.holds("A"));
    }

    #[test]
    fn failed_trade_log_append_is_retried_on_replay() {
        // GIVEN a trade log path that cannot be opened as a file
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("trades.jsonl");
        let mut t = tracker(&dir);
        t.advance(d(1), &ranking(d(1), "A"), &prices(10.0)).unwrap();
        fs::create_dir(&log_path).unwrap();

        // WHEN the advance that produces trades fails to log them
        let err = t.advance(d(2), &ranking(d(2), "A"), &prices(10.0)).unwrap_err();
        assert!(matches!(err, TrackerError::Io { .. }));

        // THEN the retry after a restart replays the date and logs the trades once
        fs::remove_dir(&log_path).unwrap();
        let mut reopened = tracker(&dir);
        assert_eq!(reopened.portfolio().as_of_date, Some(d(2)));
        let retry = reopened.advance(d(2), &ranking(d(2), "A"), &prices(10.0)).unwrap();
        assert!(retry.replayed);
        assert!(!retry.trades.is_empty());
        let logged = TradeLog::new(&log_path, "live").read_run().unwrap();
        assert_eq!(logged, retry.trades);

        reopened.advance(d(2), &ranking(d(2), "A"), &prices(10.0)).unwrap();
        assert_eq!(TradeLog::new(&log_path, "live").read_run().unwrap().len(), logged.len());
    }

    #[test]
    fn mismatched_ranking_date_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        let err = t.advance(d(2), &ranking(d(1), "A"), &prices(10.0)).unwrap_err();
        assert!(matches!(err, TrackerError::RankingDate { .. }));
    }
}
