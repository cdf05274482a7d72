//! Date ranges and walk-forward train/validate windows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// One walk-forward window: a training range followed by a validation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BacktestWindow {
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub validate_start: NaiveDate,
    pub validate_end: NaiveDate,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("train range is empty: {start} > {end}")]
    EmptyTrain { start: NaiveDate, end: NaiveDate },
    #[error("validate range is empty: {start} > {end}")]
    EmptyValidate { start: NaiveDate, end: NaiveDate },
    #[error("train_end {train_end} must be strictly before validate_start {validate_start}")]
    Overlap {
        train_end: NaiveDate,
        validate_start: NaiveDate,
    },
    #[error("validate_end {validate_end} must be strictly before holdout_start {holdout_start}")]
    TouchesHoldout {
        validate_end: NaiveDate,
        holdout_start: NaiveDate,
    },
}

impl BacktestWindow {
    pub fn train(&self) -> DateRange {
        DateRange::new(self.train_start, self.train_end)
    }

    pub fn validate(&self) -> DateRange {
        DateRange::new(self.validate_start, self.validate_end)
    }

    /// Check the ordering invariants against the global holdout boundary.
    pub fn check(&self, holdout_start: NaiveDate) -> Result<(), WindowError> {
        if self.train_start > self.train_end {
            return Err(WindowError::EmptyTrain {
                start: self.train_start,
                end: self.train_end,
            });
        }
        if self.validate_start > self.validate_end {
            return Err(WindowError::EmptyValidate {
                start: self.validate_start,
                end: self.validate_end,
            });
        }
        if self.train_end >= self.validate_start {
            return Err(WindowError::Overlap {
                train_end: self.train_end,
                validate_start: self.validate_start,
            });
        }
        if self.validate_end >= holdout_start {
            return Err(WindowError::TouchesHoldout {
                validate_end: self.validate_end,
                holdout_start,
            });
        }
        Ok(())
    }
}
