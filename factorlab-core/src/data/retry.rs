//! Retry and pacing wrapper for data adapters.
//!
//! Transient failures are retried with exponential backoff up to
//! `max_attempts`; when the budget runs out the failure is escalated to
//! [`DataError::RetriesExhausted`], which the scoring engine treats as a
//! data-integrity exclusion. Calls are also paced by a minimum interval.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::provider::{DataAccess, DataError, Observation};
use crate::domain::{Bar, DateRange};

/// Backoff and pacing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            min_interval_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// A `DataAccess` that retries transient failures of the wrapped adapter.
#[derive(Debug)]
pub struct RetryingAccess<D> {
    inner: D,
    policy: RetryPolicy,
    last_call: Mutex<Option<Instant>>,
}

impl<D: DataAccess> RetryingAccess<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            last_call: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn pace(&self) {
        if self.policy.min_interval_ms == 0 {
            return;
        }
        let min_interval = Duration::from_millis(self.policy.min_interval_ms);
        let mut last = self.last_call.lock().unwrap();
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn with_retry<T>(
        &self,
        op: &str,
        mut call: impl FnMut() -> Result<T, DataError>,
    ) -> Result<T, DataError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.pace();
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    std::thread::sleep(delay);
                }
                Err(e) if e.is_transient() => {
                    warn!(op, attempts = attempt, error = %e, "retries exhausted");
                    return Err(DataError::RetriesExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<D: DataAccess> DataAccess for RetryingAccess<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn instruments(&self) -> Vec<String> {
        self.inner.instruments()
    }

    fn bars(&self, instrument: &str, as_of: NaiveDate) -> Result<Vec<Bar>, DataError> {
        self.with_retry("bars", || self.inner.bars(instrument, as_of))
    }

    fn recent_bars(
        &self,
        instrument: &str,
        as_of: NaiveDate,
        count: usize,
    ) -> Result<Vec<Bar>, DataError> {
        self.with_retry("recent_bars", || {
            self.inner.recent_bars(instrument, as_of, count)
        })
    }

    fn get_series(
        &self,
        instrument: &str,
        field: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<Observation>, DataError> {
        self.with_retry("get_series", || {
            self.inner.get_series(instrument, field, as_of)
        })
    }

    fn trading_dates(&self, range: DateRange) -> Vec<NaiveDate> {
        self.inner.trading_dates(range)
    }
}
