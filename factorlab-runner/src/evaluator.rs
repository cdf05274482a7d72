//! Candidate evaluation — rank, simulate and measure parameter sets on a date range.
//!
//! The evaluator owns a price panel covering every range it will be asked
//! about and a per-run snapshot memo, so evaluating hundreds of candidates
//! only computes factor snapshots once per rebalance date. Batches run as a
//! rayon parallel map with no shared mutable state beyond the memo.

use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::metrics::PerformanceMetrics;
use factorlab_core::data::{DataAccess, DataError};
use factorlab_core::domain::{DateRange, ParameterSet, ParamsHash};
use factorlab_core::scoring::{FactorScoringEngine, Ranking, ScoringError, SnapshotMemo};
use factorlab_core::simulator::{PricePanel, SimulationError, SimulationResult, SimulationRules, Simulator};

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("scoring error: {0}")]
    Scoring(#[from] ScoringError),
    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("no trading days in {start}..={end}")]
    EmptyRange { start: NaiveDate, end: NaiveDate },
}

/// Metrics of one candidate on one range.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub params: ParameterSet,
    pub hash: ParamsHash,
    pub metrics: PerformanceMetrics,
}

pub struct Evaluator<'a> {
    data: &'a dyn DataAccess,
    engine: FactorScoringEngine,
    universe: Vec<String>,
    rules: SimulationRules,
    capital: f64,
    panel: PricePanel,
    memo: SnapshotMemo,
}

impl<'a> Evaluator<'a> {
    /// Load the price panel for `coverage` once; every later range must fall inside it.
    pub fn new(
        data: &'a dyn DataAccess,
        engine: FactorScoringEngine,
        universe: Vec<String>,
        rules: SimulationRules,
        capital: f64,
        coverage: DateRange,
    ) -> Result<Self, EvaluationError> {
        let panel = PricePanel::load(data, &universe, coverage)?;
        debug!(
            instruments = universe.len(),
            days = panel.len(),
            "evaluator panel loaded"
        );
        Ok(Self {
            data,
            engine,
            universe,
            rules,
            capital,
            panel,
            memo: SnapshotMemo::new(),
        })
    }

    pub fn engine(&self) -> &FactorScoringEngine {
        &self.engine
    }

    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    pub fn rules(&self) -> &SimulationRules {
        &self.rules
    }

    /// Trading days of the panel inside `range`.
    pub fn trading_days(&self, range: DateRange) -> Vec<NaiveDate> {
        self.panel.slice(range).dates()
    }

    /// Rankings for every rebalance date of `range`.
    pub fn rankings(
        &self,
        params: &ParameterSet,
        range: DateRange,
    ) -> Result<BTreeMap<NaiveDate, Ranking>, EvaluationError> {
        let days = self.trading_days(range);
        let mut out = BTreeMap::new();
        for date in self.rules.rebalance_dates(&days) {
            let set = self
                .memo
                .get_or_compute(&self.engine, self.data, date, &self.universe);
            out.insert(date, self.engine.rank(&set, date, params)?);
        }
        Ok(out)
    }

    /// Full simulation of `params` over `range`, trades included.
    pub fn simulate(
        &self,
        params: &ParameterSet,
        range: DateRange,
    ) -> Result<SimulationResult, EvaluationError> {
        let panel = self.panel.slice(range);
        if panel.is_empty() {
            return Err(EvaluationError::EmptyRange {
                start: range.start,
                end: range.end,
            });
        }
        let rankings = self.rankings(params, range)?;
        let simulator = Simulator::new(params.clone(), self.rules.clone())?;
        Ok(simulator.simulate(&rankings, &panel, self.capital)?)
    }

    pub fn evaluate(
        &self,
        params: &ParameterSet,
        range: DateRange,
    ) -> Result<Evaluation, EvaluationError> {
        let result = self.simulate(params, range)?;
        Ok(Evaluation {
            params: params.clone(),
            hash: params.fingerprint(),
            metrics: PerformanceMetrics::from_result(&result),
        })
    }

    /// Evaluate a batch in parallel; results come back in candidate order.
    pub fn evaluate_all(
        &self,
        candidates: &[ParameterSet],
        range: DateRange,
    ) -> Vec<Result<Evaluation, EvaluationError>> {
        candidates
            .par_iter()
            .map(|p| self.evaluate(p, range))
            .collect()
    }

    /// Number of dates with cached snapshots.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use factorlab_core::data::{InMemoryStore, Observation};
    use factorlab_core::domain::{Bar, FactorDirection, FactorSource, FactorSpec};
    use factorlab_core::scoring::UniverseFilter;

    fn d0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    fn store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        for k in 0..4 {
            let sym = format!("S{k}");
            let bars = (0..40)
                .map(|i| {
                    let close = 10.0 + k as f64 + (i as f64 * 0.3 + k as f64).sin();
                    Bar {
                        instrument: sym.clone(),
                        date: d0() + Duration::days(i),
                        open: close,
                        high: close + 0.1,
                        low: close - 0.1,
                        close,
                        volume: 1_000,
                    }
                })
                .collect();
            store.insert_bars(&sym, bars);
            store.insert_fundamental(&sym, "pe", vec![Observation::new(d0(), 5.0 + k as f64)]);
        }
        store
    }

    fn engine() -> FactorScoringEngine {
        FactorScoringEngine::new(
            vec![FactorSpec {
                name: "pe".into(),
                direction: FactorDirection::LowerIsBetter,
                source: FactorSource::Fundamental { field: "pe".into() },
            }],
            UniverseFilter::default(),
        )
    }

    fn params(n: usize) -> ParameterSet {
        ParameterSet::new([("pe".to_string(), 1.0)].into_iter().collect(), n, 0.08, 0.2).unwrap()
    }

    #[test]
    fn parallel_batch_matches_sequential() {
        let store = store();
        let range = DateRange::new(d0(), d0() + Duration::days(39));
        let universe: Vec<String> = (0..4).map(|k| format!("S{k}")).collect();
        let ev = Evaluator::new(&store, engine(), universe, SimulationRules::default(), 10_000.0, range)
            .unwrap();
        let candidates = vec![params(1), params(2), params(3)];
        let batch = ev.evaluate_all(&candidates, range);
        for (c, r) in candidates.iter().zip(batch) {
            let seq = ev.evaluate(c, range).unwrap();
            assert_eq!(r.unwrap(), seq);
        }
        // One snapshot set per rebalance date, shared by every candidate.
        assert_eq!(ev.memo_len(), 8);
    }

    #[test]
    fn empty_range_is_an_error() {
        let store = store();
        let range = DateRange::new(d0(), d0() + Duration::days(39));
        let ev = Evaluator::new(&store, engine(), vec!["S0".into()], SimulationRules::default(), 10_000.0, range)
            .unwrap();
        let outside = DateRange::new(d0() + Duration::days(100), d0() + Duration::days(110));
        assert!(matches!(
            ev.evaluate(&params(1), outside),
            Err(EvaluationError::EmptyRange { .. })
        ));
    }
}
