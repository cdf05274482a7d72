//! Holdout validation — one last look at a range no window ever touched.
//!
//! The accepted parameters are simulated on the holdout range and the
//! holdout return is compared with the mean walk-forward validation return.
//! A gap strictly above the tolerance is an overfit rejection.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::evaluator::{EvaluationError, Evaluator};
use crate::metrics::PerformanceMetrics;
use factorlab_core::domain::{DateRange, ParameterSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    WithinTolerance,
    OverfitDetected,
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictReason::WithinTolerance => write!(f, "within_tolerance"),
            VerdictReason::OverfitDetected => write!(f, "overfit_detected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub metrics: PerformanceMetrics,
    /// |holdout return − mean walk-forward validation return|
    pub overfit_gap: f64,
    pub mean_wfo_return: f64,
    pub reason: VerdictReason,
}

#[derive(Debug, Clone)]
pub struct HoldoutValidator {
    range: DateRange,
    overfit_tolerance: f64,
}

impl HoldoutValidator {
    pub fn new(range: DateRange, overfit_tolerance: f64) -> Self {
        Self {
            range,
            overfit_tolerance,
        }
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    /// Simulate `params` on the holdout range and judge the result.
    pub fn validate(
        &self,
        evaluator: &Evaluator<'_>,
        params: &ParameterSet,
        mean_wfo_return: f64,
    ) -> Result<ValidationVerdict, EvaluationError> {
        let evaluation = evaluator.evaluate(params, self.range)?;
        let verdict = self.judge(evaluation.metrics, mean_wfo_return);
        info!(
            params = %evaluation.hash.short(),
            holdout_return = verdict.metrics.total_return,
            mean_wfo_return,
            gap = verdict.overfit_gap,
            accepted = verdict.accepted,
            "holdout validated"
        );
        Ok(verdict)
    }

    /// Pure verdict from holdout metrics.
    pub fn judge(&self, metrics: PerformanceMetrics, mean_wfo_return: f64) -> ValidationVerdict {
        let overfit_gap = (metrics.total_return - mean_wfo_return).abs();
        let accepted = overfit_gap <= self.overfit_tolerance;
        ValidationVerdict {
            accepted,
            metrics,
            overfit_gap,
            mean_wfo_return,
            reason: if accepted {
                VerdictReason::WithinTolerance
            } else {
                VerdictReason::OverfitDetected
            },
        }
    }
}
