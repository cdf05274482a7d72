//! Factor scoring: raw factors, percentile ranks, composite ranking

pub mod engine;
pub mod factors;
pub mod percentile;

pub use engine::{
    Exclusion, ExclusionReason, FactorScoringEngine, Ranking, ScoringError, SnapshotMemo,
    SnapshotSet, UniverseFilter,
};
pub use factors::compute_factor;
pub use percentile::percentile_ranks;
