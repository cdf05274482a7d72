//! Engine-wide error taxonomy.
//!
//! Every module keeps its own `thiserror` enum; `EngineError` gathers them
//! and `kind()` maps each onto the failure class written to the report log.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::evaluator::EvaluationError;
use crate::lease::LeaseError;
use crate::report::ReportError;
use crate::supervisor::SupervisorError;
use crate::tracker::TrackerError;
use crate::walk_forward::WalkForwardError;
use factorlab_core::data::DataError;
use factorlab_core::scoring::ScoringError;
use factorlab_core::simulator::SimulationError;

/// Failure classes recorded on terminal reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing, stale or look-ahead data; exhausted retries end up here too.
    DataIntegrity,
    /// Search budget exhausted or a non-recoverable engine error.
    OptimizationFailed,
    /// Holdout rejection. Recoverable by the optimizer.
    OverfitDetected,
    /// A live sibling holds the lease.
    LockConflict,
    /// I/O failure that may succeed on retry.
    TransientIo,
    /// Cooperative stop requested.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::DataIntegrity => "data_integrity",
            FailureKind::OptimizationFailed => "optimization_failed",
            FailureKind::OverfitDetected => "overfit_detected",
            FailureKind::LockConflict => "lock_conflict",
            FailureKind::TransientIo => "transient_io",
            FailureKind::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    WalkForward(#[from] WalkForwardError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Data(e) => data_kind(e),
            EngineError::Evaluation(e) => evaluation_kind(e),
            EngineError::WalkForward(e) => walk_forward_kind(e),
            EngineError::Lease(e) => lease_kind(e),
            EngineError::Report(_) => FailureKind::TransientIo,
            EngineError::Tracker(TrackerError::Io { .. }) => FailureKind::TransientIo,
            EngineError::Tracker(_) => FailureKind::DataIntegrity,
            EngineError::Supervisor(e) => e.kind(),
            EngineError::Config(_) | EngineError::Scoring(_) | EngineError::Simulation(_) => {
                FailureKind::OptimizationFailed
            }
        }
    }
}

pub(crate) fn data_kind(e: &DataError) -> FailureKind {
    if e.is_transient() {
        FailureKind::TransientIo
    } else {
        FailureKind::DataIntegrity
    }
}

pub(crate) fn evaluation_kind(e: &EvaluationError) -> FailureKind {
    match e {
        EvaluationError::Data(d) => data_kind(d),
        _ => FailureKind::OptimizationFailed,
    }
}

pub(crate) fn walk_forward_kind(e: &WalkForwardError) -> FailureKind {
    match e {
        WalkForwardError::Evaluation(inner) => evaluation_kind(inner),
        _ => FailureKind::OptimizationFailed,
    }
}

pub(crate) fn lease_kind(e: &LeaseError) -> FailureKind {
    match e {
        LeaseError::LockConflict { .. } => FailureKind::LockConflict,
        LeaseError::Lost { .. } | LeaseError::Io { .. } => FailureKind::TransientIo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn lock_conflict_maps_to_lock_conflict() {
        let e: EngineError = LeaseError::LockConflict {
            holder: "x".into(),
            renewed_at: Utc::now(),
        }
        .into();
        assert_eq!(e.kind(), FailureKind::LockConflict);
    }

    #[test]
    fn exhausted_retries_are_data_integrity() {
        let e: EngineError = DataError::RetriesExhausted {
            attempts: 3,
            last: "timeout".into(),
        }
        .into();
        assert_eq!(e.kind(), FailureKind::DataIntegrity);
        let t: EngineError = DataError::Transient("timeout".into()).into();
        assert_eq!(t.kind(), FailureKind::TransientIo);
    }

    #[test]
    fn nested_evaluation_data_error_keeps_class() {
        let e: EngineError = WalkForwardError::Evaluation(EvaluationError::Data(
            DataError::UnknownInstrument("X".into()),
        ))
        .into();
        assert_eq!(e.kind(), FailureKind::DataIntegrity);
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::OptimizationFailed).unwrap();
        assert_eq!(json, "\"optimization_failed\"");
        assert_eq!(FailureKind::LockConflict.to_string(), "lock_conflict");
    }
}
