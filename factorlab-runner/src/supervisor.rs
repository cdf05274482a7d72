//! Optimization supervisor — the single long-lived writer for a state directory.
//!
//! Lifecycle:
//! 1. Acquire the heartbeat lease. A live holder means `LockConflict` and
//!    nothing else happens: no report log is opened, no record is written.
//! 2. Build the evaluator and walk-forward optimizer.
//! 3. Pull steps until the optimizer is done or cancellation is requested,
//!    appending one report per step.
//! 4. Append exactly one terminal record, then release the lease.
//!
//! Cancellation is cooperative and checked between steps, so a window is
//! never cut short. Lease ownership is checked before every append: once
//! another holder has the lease, nothing more is written and `run` returns
//! `LeaseError::Lost`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{lease_kind, EngineError, FailureKind};
use crate::evaluator::Evaluator;
use crate::holdout::ValidationVerdict;
use crate::lease::{LeaseError, LeaseGuard};
use crate::report::{write_atomic, IterationReport, ReportDraft, ReportError, ReportKind, ReportLog};
use crate::search::SearchStrategy;
use crate::walk_forward::{OptimizerOutcome, OptimizerStep, WalkForwardOptimizer};
use factorlab_core::data::DataAccess;
use factorlab_core::domain::{DateRange, ParameterSet};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("supervisor I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt parameter file {path}: {source}")]
    Params {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SupervisorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SupervisorError::Lease(e) => lease_kind(e),
            SupervisorError::Report(_) | SupervisorError::Io { .. } => FailureKind::TransientIo,
            SupervisorError::Params { .. } => FailureKind::DataIntegrity,
        }
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, SupervisorError::Lease(LeaseError::LockConflict { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorOutcome {
    Accepted {
        params: ParameterSet,
        verdict: ValidationVerdict,
    },
    Failed {
        kind: FailureKind,
        reason: String,
    },
    Cancelled,
}

impl SupervisorOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SupervisorOutcome::Accepted { .. })
    }
}

/// Parameters handed from the optimizer to the tracker and backtests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedParams {
    pub strategy: String,
    pub config_hash: String,
    pub params: ParameterSet,
    pub holdout: ValidationVerdict,
}

pub struct Supervisor<'a> {
    config: &'a EngineConfig,
    data: &'a dyn DataAccess,
    strategy: Option<Arc<dyn SearchStrategy>>,
}

impl<'a> Supervisor<'a> {
    pub fn new(config: &'a EngineConfig, data: &'a dyn DataAccess) -> Self {
        Self {
            config,
            data,
            strategy: None,
        }
    }

    /// Search with `strategy` instead of the one named in the config.
    pub fn with_strategy(mut self, strategy: Arc<dyn SearchStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Run the optimizer to completion, failure or cancellation.
    ///
    /// Engine failures are written to the report log as a terminal record
    /// and returned as `SupervisorOutcome::Failed`. Only lease and report
    /// I/O problems surface as `Err`.
    pub fn run(&self, cancel: Option<&AtomicBool>) -> Result<SupervisorOutcome, SupervisorError> {
        let holder = self.config.holder_name();
        let config_hash = self.config.config_hash();
        let lease = LeaseGuard::acquire(
            self.config.lease_path(),
            &holder,
            self.config.supervisor.lease_ttl_secs,
        )?;
        info!(
            holder = %holder,
            strategy = %self.config.strategy.name,
            config = %&config_hash[..12],
            "supervisor started"
        );

        let mut log = ReportLog::open(self.config.report_path())?;
        let outcome = self.drive(&mut log, &lease, cancel);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(DriveError::Fatal(e)) => {
                // Either the log is broken or the lease is gone; nothing more is recorded.
                warn!(error = %e, "supervisor stopping without a terminal record");
                lease.release()?;
                return Err(e);
            }
            Err(DriveError::Engine { pass, error }) => {
                let kind = error.kind();
                let reason = error.to_string();
                warn!(kind = %kind, reason = %reason, "supervisor stopping on error");
                append_held(
                    &mut log,
                    &lease,
                    ReportDraft::new(ReportKind::Terminal, pass, reason.clone()).failure(kind),
                )?;
                SupervisorOutcome::Failed { kind, reason }
            }
        };

        if let SupervisorOutcome::Accepted { params, verdict } = &outcome {
            self.write_accepted(params, verdict)?;
        }
        lease.release()?;
        info!(holder = %holder, outcome = outcome_label(&outcome), "supervisor finished");
        Ok(outcome)
    }

    fn drive(
        &self,
        log: &mut ReportLog,
        lease: &LeaseGuard,
        cancel: Option<&AtomicBool>,
    ) -> Result<SupervisorOutcome, DriveError> {
        let wf = &self.config.walk_forward;
        let universe = self.config.resolve_universe(self.data);
        let evaluator = Evaluator::new(
            self.data,
            self.config.scoring_engine(),
            universe,
            self.config.simulation.clone(),
            self.config.strategy.initial_capital,
            DateRange::new(wf.start, wf.holdout_end),
        )
        .map_err(|e| DriveError::engine(0, e))?;
        let mut optimizer = match &self.strategy {
            Some(strategy) => {
                WalkForwardOptimizer::with_strategy(evaluator, self.config, Box::new(Arc::clone(strategy)))
            }
            None => WalkForwardOptimizer::from_config(evaluator, self.config),
        }
        .map_err(|e| DriveError::engine(0, e))?;
        let pause = Duration::from_millis(self.config.supervisor.iteration_pause_ms);

        while !optimizer.is_done() {
            lease.ensure_held().map_err(SupervisorError::from)?;
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                info!(pass = optimizer.pass(), "cancellation requested");
                append_held(
                    log,
                    lease,
                    ReportDraft::new(ReportKind::Terminal, optimizer.pass(), "cancelled")
                        .failure(FailureKind::Cancelled),
                )?;
                return Ok(SupervisorOutcome::Cancelled);
            }
            let pass = optimizer.pass();
            let step = optimizer
                .next_step()
                .map_err(|e| DriveError::engine(pass, e))?;
            let report = append_held(log, lease, step_draft(&step, optimizer.windows().len()))?;
            debug!(id = %report.iteration_id, kind = ?report.kind, "report appended");
            if !pause.is_zero() && !optimizer.is_done() {
                thread::sleep(pause);
            }
        }

        let pass = optimizer.pass();
        match optimizer.outcome().cloned() {
            Some(OptimizerOutcome::Accepted { params, verdict }) => {
                append_held(
                    log,
                    lease,
                    ReportDraft::new(ReportKind::Terminal, pass, "accepted")
                        .params(params.clone())
                        .metrics(verdict.metrics.clone())
                        .accepted(true),
                )?;
                Ok(SupervisorOutcome::Accepted { params, verdict })
            }
            Some(OptimizerOutcome::Failed { kind, reason }) => {
                append_held(
                    log,
                    lease,
                    ReportDraft::new(ReportKind::Terminal, pass, reason.clone()).failure(kind),
                )?;
                Ok(SupervisorOutcome::Failed { kind, reason })
            }
            None => {
                let reason = "optimizer finished without an outcome".to_string();
                append_held(
                    log,
                    lease,
                    ReportDraft::new(ReportKind::Terminal, pass, reason.clone())
                        .failure(FailureKind::OptimizationFailed),
                )?;
                Ok(SupervisorOutcome::Failed {
                    kind: FailureKind::OptimizationFailed,
                    reason,
                })
            }
        }
    }

    fn write_accepted(
        &self,
        params: &ParameterSet,
        verdict: &ValidationVerdict,
    ) -> Result<(), SupervisorError> {
        let path = self.config.accepted_params_path();
        let record = AcceptedParams {
            strategy: self.config.strategy.name.clone(),
            config_hash: self.config.config_hash(),
            params: params.clone(),
            holdout: verdict.clone(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|source| SupervisorError::Params {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, json.as_bytes()).map_err(|source| SupervisorError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), params = %params.fingerprint().short(), "accepted parameters written");
        Ok(())
    }
}

/// Read parameters from either an `accepted_params.json` record or a bare
/// `ParameterSet` JSON file.
pub fn read_params(path: &Path) -> Result<ParameterSet, SupervisorError> {
    let content = fs::read_to_string(path).map_err(|source| SupervisorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let params = match serde_json::from_str::<AcceptedParams>(&content) {
        Ok(record) => record.params,
        Err(_) => serde_json::from_str::<ParameterSet>(&content).map_err(|source| {
            SupervisorError::Params {
                path: path.to_path_buf(),
                source,
            }
        })?,
    };
    params.validate().map_err(|e| SupervisorError::Params {
        path: path.to_path_buf(),
        source: <serde_json::Error as serde::de::Error>::custom(e),
    })?;
    Ok(params)
}

// ─── Step → report ──────────────────────────────────────────────────

fn step_draft(step: &OptimizerStep, windows: usize) -> ReportDraft {
    match step {
        OptimizerStep::Window(o) => ReportDraft::new(
            ReportKind::Window,
            o.pass,
            format!(
                "window {}/{} winner {} of {} candidates",
                o.index + 1,
                windows,
                o.winner_hash.short(),
                o.candidates
            ),
        )
        .window(o.window)
        .params(o.winner.clone())
        .metrics(o.validation_metrics.clone()),
        OptimizerStep::PassRejected(s) => {
            let mut draft = ReportDraft::new(ReportKind::PassRejected, s.pass, s.reason.clone())
                .metrics(s.validation.clone());
            if let Some(candidate) = &s.candidate {
                draft = draft.params(candidate.clone());
            }
            draft
        }
        OptimizerStep::Holdout(h) => {
            let draft = ReportDraft::new(
                ReportKind::Holdout,
                h.pass,
                format!("{} (gap {:.4})", h.verdict.reason, h.verdict.overfit_gap),
            )
            .params(h.params.clone())
            .metrics(h.verdict.metrics.clone())
            .accepted(h.verdict.accepted);
            if h.verdict.accepted {
                draft
            } else {
                draft.failure(FailureKind::OverfitDetected)
            }
        }
    }
}

fn outcome_label(outcome: &SupervisorOutcome) -> &'static str {
    match outcome {
        SupervisorOutcome::Accepted { .. } => "accepted",
        SupervisorOutcome::Failed { .. } => "failed",
        SupervisorOutcome::Cancelled => "cancelled",
    }
}

/// Append only while the lease is still ours.
fn append_held(
    log: &mut ReportLog,
    lease: &LeaseGuard,
    draft: ReportDraft,
) -> Result<IterationReport, SupervisorError> {
    lease.ensure_held()?;
    Ok(log.append(draft)?)
}

enum DriveError {
    /// Lease or report log failure; no further record can be written.
    Fatal(SupervisorError),
    Engine { pass: usize, error: EngineError },
}

impl DriveError {
    fn engine(pass: usize, error: impl Into<EngineError>) -> Self {
        DriveError::Engine {
            pass,
            error: error.into(),
        }
    }
}

impl From<SupervisorError> for DriveError {
    fn from(e: SupervisorError) -> Self {
        DriveError::Fatal(e)
    }
}

/// Reports written by the most recent run, oldest first.
pub fn last_run(reports: &[IterationReport]) -> &[IterationReport] {
    let start = reports[..reports.len().saturating_sub(1)]
        .iter()
        .rposition(|r| r.kind == ReportKind::Terminal)
        .map_or(0, |i| i + 1);
    &reports[start..]
}
