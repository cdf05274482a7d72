//! Parameter search — pluggable strategies that propose candidate parameter sets.
//!
//! Two strategies ship:
//! - `GridSearch`: every weight vector on a simplex grid × every risk-knob combination
//! - `RandomSearch`: seeded Dirichlet-like weight draws, reproducible per pass
//!
//! Every window of a pass scores the same candidate pool, otherwise no
//! candidate could appear in more than one window's band. Seeds come from an
//! `RngHierarchy` keyed by pass, never by evaluation order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::config::{SearchConfig, SearchKind};
use crate::metrics::PerformanceMetrics;
use factorlab_core::domain::ParameterSet;

/// Smallest grid step `expand` will shrink to.
const MIN_GRID_STEP: f64 = 0.05;

// ─── Search space ───────────────────────────────────────────────────

/// A region around rejected parameters whose candidates lose Sharpe points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyRegion {
    pub center: ParameterSet,
    pub radius: f64,
    pub penalty: f64,
}

impl PenaltyRegion {
    pub fn contains(&self, candidate: &ParameterSet) -> bool {
        candidate.weight_distance(&self.center) <= self.radius
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub factors: Vec<String>,
    pub grid_step: f64,
    pub samples: usize,
    pub position_counts: Vec<usize>,
    pub stop_loss_pcts: Vec<f64>,
    pub drawdown_control_pcts: Vec<f64>,
    pub penalties: Vec<PenaltyRegion>,
}

impl SearchSpace {
    pub fn from_config(factors: Vec<String>, config: &SearchConfig) -> Self {
        Self {
            factors,
            grid_step: config.grid_step,
            samples: config.samples,
            position_counts: config.position_counts.clone(),
            stop_loss_pcts: config.stop_loss_pcts.clone(),
            drawdown_control_pcts: config.drawdown_control_pcts.clone(),
            penalties: Vec::new(),
        }
    }

    /// Widened space for the next pass after a rejection.
    ///
    /// Halves the grid step, doubles the random sample budget and brackets
    /// the risk knobs with ±25% neighbours.
    pub fn expand(&self) -> Self {
        Self {
            factors: self.factors.clone(),
            grid_step: (self.grid_step / 2.0).max(MIN_GRID_STEP),
            samples: self.samples.saturating_mul(2),
            position_counts: self.position_counts.clone(),
            stop_loss_pcts: bracket(&self.stop_loss_pcts),
            drawdown_control_pcts: bracket(&self.drawdown_control_pcts),
            penalties: self.penalties.clone(),
        }
    }

    pub fn add_penalty(&mut self, region: PenaltyRegion) {
        self.penalties.push(region);
    }

    /// Total Sharpe penalty for a candidate.
    pub fn penalty_for(&self, candidate: &ParameterSet) -> f64 {
        self.penalties
            .iter()
            .filter(|r| r.contains(candidate))
            .map(|r| r.penalty)
            .sum()
    }

    fn risk_combinations(&self) -> Vec<(usize, f64, f64)> {
        let mut out = Vec::new();
        for &n in &self.position_counts {
            for &sl in &self.stop_loss_pcts {
                for &dd in &self.drawdown_control_pcts {
                    out.push((n, sl, dd));
                }
            }
        }
        out
    }
}

/// Add the ±25% neighbours of the extremes, clipped to (0, 1), sorted and deduplicated.
fn bracket(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.to_vec();
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    for v in [lo * 0.75, hi * 1.25] {
        if v > 0.0 && v < 1.0 {
            out.push(round4(v));
        }
    }
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    out
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

// ─── Strategy trait ─────────────────────────────────────────────────

/// Proposes candidates for a window and scores their training results.
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Candidates for window `window` of pass `pass`; deterministic in its inputs.
    fn propose(&self, space: &SearchSpace, pass: usize, window: usize) -> Vec<ParameterSet>;

    /// Training objective: Sharpe minus any penalty-region deductions.
    fn evaluate(&self, candidate: &ParameterSet, metrics: &PerformanceMetrics, space: &SearchSpace) -> f64 {
        metrics.sharpe - space.penalty_for(candidate)
    }
}

/// Shared strategies, e.g. one handed to a supervisor and inspected afterwards.
impl<S: SearchStrategy + ?Sized> SearchStrategy for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn propose(&self, space: &SearchSpace, pass: usize, window: usize) -> Vec<ParameterSet> {
        (**self).propose(space, pass, window)
    }

    fn evaluate(&self, candidate: &ParameterSet, metrics: &PerformanceMetrics, space: &SearchSpace) -> f64 {
        (**self).evaluate(candidate, metrics, space)
    }
}

pub fn strategy_from_config(config: &SearchConfig) -> Box<dyn SearchStrategy> {
    match config.strategy {
        SearchKind::Grid => Box::new(GridSearch),
        SearchKind::Random => Box::new(RandomSearch::new(config.seed)),
    }
}

// ─── Grid ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct GridSearch;

impl SearchStrategy for GridSearch {
    fn name(&self) -> &str {
        "grid"
    }

    fn propose(&self, space: &SearchSpace, _pass: usize, _window: usize) -> Vec<ParameterSet> {
        let units = (1.0 / space.grid_step).round().max(1.0) as usize;
        let mut compositions = Vec::new();
        simplex(space.factors.len(), units, &mut Vec::new(), &mut compositions);

        let mut out = Vec::new();
        for parts in compositions {
            let weights: BTreeMap<String, f64> = space
                .factors
                .iter()
                .zip(&parts)
                .map(|(name, &p)| (name.clone(), p as f64 / units as f64))
                .collect();
            for (n, sl, dd) in space.risk_combinations() {
                if let Ok(p) = ParameterSet::new(weights.clone(), n, sl, dd) {
                    out.push(p);
                }
            }
        }
        out
    }
}

/// All ways to split `units` into `k` non-negative integer parts.
fn simplex(k: usize, units: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    if k == 0 {
        return;
    }
    if k == 1 {
        let mut parts = prefix.clone();
        parts.push(units);
        out.push(parts);
        return;
    }
    for take in (0..=units).rev() {
        prefix.push(take);
        simplex(k - 1, units - take, prefix, out);
        prefix.pop();
    }
}

// ─── Random ─────────────────────────────────────────────────────────

/// Deterministic RNG hierarchy.
///
/// The master seed is expanded into per-(stream, pass, window) sub-seeds with
/// BLAKE3, so the same master seed produces identical sub-seeds regardless
/// of the order in which windows are searched.
#[derive(Debug, Clone)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn sub_seed(&self, stream: &str, pass: u64, window: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(stream.as_bytes());
        hasher.update(&pass.to_le_bytes());
        hasher.update(&window.to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn rng_for(&self, stream: &str, pass: u64, window: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stream, pass, window))
    }
}

#[derive(Debug, Clone)]
pub struct RandomSearch {
    rng: RngHierarchy,
}

impl RandomSearch {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: RngHierarchy::new(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn propose(&self, space: &SearchSpace, pass: usize, _window: usize) -> Vec<ParameterSet> {
        // One pool per pass, shared by all of its windows.
        let mut rng = self.rng.rng_for("search", pass as u64, 0);
        let combos = space.risk_combinations();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(space.samples + 1);

        // Equal weights anchor every proposal.
        let equal: BTreeMap<String, f64> = space.factors.iter().map(|f| (f.clone(), 1.0)).collect();
        let mut draws = vec![equal];
        while draws.len() < space.samples {
            let weights: BTreeMap<String, f64> = space
                .factors
                .iter()
                .map(|f| {
                    // -ln(U) is Exp(1); normalizing gives a flat Dirichlet draw.
                    let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                    (f.clone(), round4(-u.ln()))
                })
                .collect();
            draws.push(weights);
        }

        for weights in draws {
            let Some(&(n, sl, dd)) = combos.choose(&mut rng) else {
                break;
            };
            if let Ok(p) = ParameterSet::new(weights, n, sl, dd) {
                if seen.insert(p.fingerprint()) {
                    out.push(p);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(factors: &[&str]) -> SearchSpace {
        SearchSpace::from_config(
            factors.iter().map(|s| s.to_string()).collect(),
            &SearchConfig::default(),
        )
    }

    #[test]
    fn grid_covers_simplex() {
        // 3 factors, step 0.25 → C(4 + 2, 2) = 15 weight vectors
        let s = space(&["pe", "roe", "ret_20"]);
        let candidates = GridSearch.propose(&s, 1, 0);
        assert_eq!(candidates.len(), 15);
        for c in &candidates {
            let sum: f64 = c.factor_weights.values().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn grid_multiplies_risk_combinations() {
        let mut s = space(&["pe", "roe"]);
        s.position_counts = vec![5, 10];
        s.stop_loss_pcts = vec![0.05, 0.08];
        assert_eq!(GridSearch.propose(&s, 1, 0).len(), 5 * 4);
    }

    #[test]
    fn expand_refines_and_brackets() {
        let s = space(&["pe", "roe"]);
        let e = s.expand();
        assert_eq!(e.grid_step, 0.125);
        assert_eq!(e.samples, 128);
        assert_eq!(e.stop_loss_pcts, vec![0.06, 0.08, 0.1]);
        assert!(GridSearch.propose(&e, 2, 0).len() > GridSearch.propose(&s, 1, 0).len());
        // Step never collapses below the floor.
        let mut deep = s.clone();
        for _ in 0..10 {
            deep = deep.expand();
        }
        assert_eq!(deep.grid_step, MIN_GRID_STEP);
    }

    #[test]
    fn random_pool_is_shared_by_windows_of_a_pass() {
        let s = space(&["pe", "roe", "ret_20"]);
        let search = RandomSearch::new(7);
        let a = search.propose(&s, 1, 0);
        assert_eq!(a, search.propose(&s, 1, 0));
        assert_eq!(a, search.propose(&s, 1, 3));
        assert_ne!(a, search.propose(&s, 2, 0));
        assert!(a.len() <= s.samples);
        assert!(a.len() > 1);
    }

    #[test]
    fn random_candidates_are_valid_and_unique() {
        let s = space(&["pe", "roe", "ret_20", "vol_20"]);
        let candidates = RandomSearch::new(1).propose(&s, 2, 0);
        let hashes: HashSet<_> = candidates.iter().map(|c| c.fingerprint()).collect();
        assert_eq!(hashes.len(), candidates.len());
        for c in &candidates {
            assert!(c.validate().is_ok());
        }
    }

    #[test]
    fn penalty_applies_inside_radius_only() {
        let mut s = space(&["pe", "roe"]);
        let candidates = GridSearch.propose(&s, 1, 0);
        let center = candidates[0].clone();
        s.add_penalty(PenaltyRegion {
            center: center.clone(),
            radius: 0.2,
            penalty: 1.5,
        });
        let metrics = PerformanceMetrics {
            sharpe: 2.0,
            ..PerformanceMetrics::default()
        };
        assert_eq!(GridSearch.evaluate(&center, &metrics, &s), 0.5);
        let far = candidates.last().unwrap();
        assert!(far.weight_distance(&center) > 0.2);
        assert_eq!(GridSearch.evaluate(far, &metrics, &s), 2.0);
    }

    #[test]
    fn sub_seeds_are_order_independent() {
        let h = RngHierarchy::new(42);
        let a = h.sub_seed("search", 1, 0);
        let b = h.sub_seed("search", 1, 1);
        assert_eq!(a, h.sub_seed("search", 1, 0));
        assert_ne!(a, b);
        assert_ne!(a, RngHierarchy::new(43).sub_seed("search", 1, 0));
    }
}
