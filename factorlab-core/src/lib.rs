//! FactorLab Core — domain types, point-in-time data access, factor scoring, trade simulator.
//!
//! This crate contains the deterministic heart of the strategy engine:
//! - Domain types (bars, factors, parameter sets, windows, trades, portfolio state)
//! - Point-in-time data access trait with in-memory, CSV and retrying adapters
//! - Factor computation, cross-sectional percentile ranks, composite ranking
//! - Day-by-day portfolio simulator with stop-loss, drawdown control and horizon exits

pub mod data;
pub mod domain;
pub mod scoring;
pub mod simulator;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared across the optimizer's rayon pool and
    /// the supervisor's heartbeat thread are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::ParameterSet>();
        require_sync::<domain::ParameterSet>();
        require_send::<domain::PortfolioState>();
        require_sync::<domain::PortfolioState>();
        require_send::<domain::TradeRecord>();
        require_sync::<domain::TradeRecord>();
        require_send::<domain::BacktestWindow>();
        require_sync::<domain::BacktestWindow>();

        // Data access
        require_send::<data::InMemoryStore>();
        require_sync::<data::InMemoryStore>();
        require_send::<data::RetryingAccess<data::InMemoryStore>>();
        require_sync::<data::RetryingAccess<data::InMemoryStore>>();

        // Scoring
        require_send::<scoring::FactorScoringEngine>();
        require_sync::<scoring::FactorScoringEngine>();
        require_send::<scoring::SnapshotMemo>();
        require_sync::<scoring::SnapshotMemo>();
        require_send::<scoring::Ranking>();
        require_sync::<scoring::Ranking>();

        // Simulator
        require_send::<simulator::Simulator>();
        require_sync::<simulator::Simulator>();
        require_send::<simulator::PricePanel>();
        require_sync::<simulator::PricePanel>();
        require_send::<simulator::SimulationState>();
        require_sync::<simulator::SimulationState>();
    }

    /// Architecture contract: ranking never sees portfolio state.
    ///
    /// `FactorScoringEngine::rank` takes a snapshot set and a parameter set
    /// only, so selection cannot depend on what the portfolio holds.
    #[test]
    fn ranking_has_no_portfolio_parameter() {
        fn _check_signature(
            engine: &scoring::FactorScoringEngine,
            set: &scoring::SnapshotSet,
            date: chrono::NaiveDate,
            params: &domain::ParameterSet,
        ) -> Result<scoring::Ranking, scoring::ScoringError> {
            engine.rank(set, date, params)
        }
    }
}
