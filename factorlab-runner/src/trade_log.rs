//! Trade log — JSONL of trade records tagged with the run that produced them.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use factorlab_core::domain::TradeRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedTrade {
    pub run: String,
    #[serde(flatten)]
    pub trade: TradeRecord,
}

#[derive(Debug, Clone)]
pub struct TradeLog {
    path: PathBuf,
    run: String,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>, run: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run: run.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    /// Append trades in order; returns the number written.
    pub fn append(&self, trades: &[TradeRecord]) -> io::Result<usize> {
        if trades.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for trade in trades {
            let line = LoggedTrade {
                run: self.run.clone(),
                trade: trade.clone(),
            };
            let json = serde_json::to_string(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{json}")?;
        }
        file.flush()?;
        Ok(trades.len())
    }

    /// Every logged trade, any run. Skips malformed lines.
    pub fn read_all(&self) -> io::Result<Vec<LoggedTrade>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut trades = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(t) = serde_json::from_str::<LoggedTrade>(&line) {
                trades.push(t);
            }
        }
        Ok(trades)
    }

    /// Trades logged under this log's run label.
    pub fn read_run(&self) -> io::Result<Vec<TradeRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|t| t.run == self.run)
            .map(|t| t.trade)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use factorlab_core::domain::{TradeAction, TradeReason};
    use tempfile::TempDir;

    fn trade(instrument: &str) -> TradeRecord {
        TradeRecord {
            instrument: instrument.into(),
            action: TradeAction::Enter,
            date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            price: 12.5,
            shares: 800.0,
            reason: TradeReason::Selection,
            entry_price: None,
            realized_pnl: None,
            commission: 0.0,
        }
    }

    #[test]
    fn runs_are_kept_apart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("trades.jsonl");
        let live = TradeLog::new(&path, "live");
        let backtest = TradeLog::new(&path, "backtest");

        assert_eq!(live.append(&[trade("A"), trade("B")]).unwrap(), 2);
        backtest.append(&[trade("C")]).unwrap();

        assert_eq!(live.read_all().unwrap().len(), 3);
        let mine: Vec<String> = live.read_run().unwrap().into_iter().map(|t| t.instrument).collect();
        assert_eq!(mine, vec!["A", "B"]);
        assert_eq!(backtest.read_run().unwrap().len(), 1);
    }

    #[test]
    fn flattened_line_carries_run_label() {
        let dir = TempDir::new().unwrap();
        let log = TradeLog::new(dir.path().join("t.jsonl"), "live");
        log.append(&[trade("A")]).unwrap();
        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(raw.contains("\"run\":\"live\""));
        assert!(raw.contains("\"instrument\":\"A\""));
        assert!(!raw.contains("realized_pnl"));
    }
}
