//! FactorLab Runner — walk-forward optimization, holdout validation, supervision, paper trading.
//!
//! This crate builds on `factorlab-core` to provide:
//! - TOML engine configuration
//! - Performance metrics and candidate evaluation over date ranges
//! - Pluggable parameter search (grid, seeded random)
//! - Walk-forward optimizer state machine with stability acceptance
//! - Holdout validation with overfit rejection
//! - Singleton heartbeat lease and append-only iteration report log
//! - Supervisor tying the above together for unattended runs
//! - Persisted paper portfolio tracker and JSONL trade log

pub mod config;
pub mod error;
pub mod evaluator;
pub mod holdout;
pub mod lease;
pub mod metrics;
pub mod report;
pub mod search;
pub mod supervisor;
pub mod tracker;
pub mod trade_log;
pub mod walk_forward;

pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, FailureKind};
pub use evaluator::{Evaluation, EvaluationError, Evaluator};
pub use holdout::{HoldoutValidator, ValidationVerdict, VerdictReason};
pub use lease::{LeaseError, LeaseFile, LeaseGuard, LeaseRecord};
pub use metrics::PerformanceMetrics;
pub use report::{IterationReport, ReportCursor, ReportDraft, ReportError, ReportKind, ReportLog};
pub use search::{GridSearch, RandomSearch, SearchSpace, SearchStrategy};
pub use supervisor::{read_params, AcceptedParams, Supervisor, SupervisorError, SupervisorOutcome};
pub use tracker::{Advance, PortfolioTracker, TrackerError};
pub use trade_log::{LoggedTrade, TradeLog};
pub use walk_forward::{
    generate_windows, OptimizerOutcome, OptimizerState, OptimizerStep, WalkForwardError,
    WalkForwardOptimizer,
};
