//! FactorScoringEngine — raw factor snapshots to ranked composite scores.
//!
//! Scoring is split in two stages:
//! - `snapshots`: read point-in-time data, apply the universe filter and
//!   compute every configured factor (independent of the parameter set)
//! - `rank`: pure function of a snapshot set and a parameter set
//!
//! The split lets the optimizer compute snapshots once per date and rank
//! them for hundreds of candidates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

use super::factors::compute_factor;
use super::percentile::percentile_ranks;
use crate::data::DataAccess;
use crate::domain::{Bar, FactorSnapshot, FactorSpec, ParameterSet, RankScore};

// ─── Universe filter ────────────────────────────────────────────────

/// Pre-ranking universe filter applied to the instrument's bar on the date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseFilter {
    /// Minimum close price (penny-stock filter).
    pub min_close: f64,
    pub min_volume: u64,
    /// Minimum number of bars up to and including the date.
    pub min_history: usize,
    /// Exclude instruments without a bar dated exactly on the scoring date.
    pub require_bar_on_date: bool,
}

impl Default for UniverseFilter {
    fn default() -> Self {
        Self {
            min_close: 5.0,
            min_volume: 0,
            min_history: 1,
            require_bar_on_date: true,
        }
    }
}

// ─── Results ────────────────────────────────────────────────────────

/// Why an instrument was left out of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Removed by the universe filter.
    Filtered { rule: String },
    /// A weighted factor could not be computed.
    MissingFactor { factor: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub instrument: String,
    pub reason: ExclusionReason,
}

/// Parameter-independent factor values for one date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSet {
    pub date: Option<NaiveDate>,
    /// One snapshot per instrument that passed the universe filter.
    pub snapshots: Vec<FactorSnapshot>,
    /// Instruments removed by the universe filter.
    pub filtered: Vec<Exclusion>,
    /// instrument → factor → failure detail, for factors that could not be computed.
    pub failures: BTreeMap<String, BTreeMap<String, String>>,
}

/// Ranked instruments for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub date: NaiveDate,
    /// Composite descending, ties by instrument ascending.
    pub scores: Vec<RankScore>,
    pub exclusions: Vec<Exclusion>,
}

impl Ranking {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            scores: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    /// The first `n` instruments of the ranking.
    pub fn top(&self, n: usize) -> Vec<String> {
        self.scores
            .iter()
            .take(n)
            .map(|s| s.instrument.clone())
            .collect()
    }

    /// BLAKE3 digest of the ordered (instrument, composite) list.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.date.to_string().as_bytes());
        for s in &self.scores {
            hasher.update(s.instrument.as_bytes());
            hasher.update(&[0]);
            hasher.update(&s.composite.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScoringError {
    #[error("parameter set weights factor '{0}', which is not configured")]
    UnknownFactor(String),
    #[error("parameter set has no positively weighted factor")]
    NoWeightedFactors,
}

// ─── Engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorScoringEngine {
    factors: Vec<FactorSpec>,
    filter: UniverseFilter,
    /// Maximum age in calendar days of a fundamental observation.
    max_staleness_days: Option<i64>,
}

impl FactorScoringEngine {
    pub fn new(factors: Vec<FactorSpec>, filter: UniverseFilter) -> Self {
        Self {
            factors,
            filter,
            max_staleness_days: None,
        }
    }

    pub fn with_max_staleness(mut self, days: Option<i64>) -> Self {
        self.max_staleness_days = days;
        self
    }

    pub fn factors(&self) -> &[FactorSpec] {
        &self.factors
    }

    pub fn filter(&self) -> &UniverseFilter {
        &self.filter
    }

    fn history_needed(&self) -> usize {
        self.factors
            .iter()
            .map(|f| f.source.bars_required())
            .max()
            .unwrap_or(0)
            .max(self.filter.min_history)
            .max(1)
    }

    /// Apply the universe filter and compute every configured factor on `date`.
    pub fn snapshots(&self, data: &dyn DataAccess, date: NaiveDate, universe: &[String]) -> SnapshotSet {
        let mut set = SnapshotSet {
            date: Some(date),
            ..SnapshotSet::default()
        };
        let needed = self.history_needed();

        for instrument in universe {
            let bars = match data.recent_bars(instrument, date, needed) {
                Ok(bars) => bars,
                Err(e) => {
                    set.filtered.push(Exclusion {
                        instrument: instrument.clone(),
                        reason: ExclusionReason::Filtered {
                            rule: format!("no data: {e}"),
                        },
                    });
                    continue;
                }
            };
            if let Some(rule) = self.filter_rule(&bars, date) {
                set.filtered.push(Exclusion {
                    instrument: instrument.clone(),
                    reason: ExclusionReason::Filtered { rule },
                });
                continue;
            }

            let mut values = BTreeMap::new();
            for spec in &self.factors {
                match compute_factor(data, spec, instrument, date, &bars, self.max_staleness_days) {
                    Ok(v) => {
                        values.insert(spec.name.clone(), v);
                    }
                    Err(e) => {
                        set.failures
                            .entry(instrument.clone())
                            .or_default()
                            .insert(spec.name.clone(), e.to_string());
                    }
                }
            }
            set.snapshots.push(FactorSnapshot {
                instrument: instrument.clone(),
                date,
                values,
            });
        }

        debug!(
            %date,
            universe = universe.len(),
            survivors = set.snapshots.len(),
            filtered = set.filtered.len(),
            "computed factor snapshots"
        );
        set
    }

    fn filter_rule(&self, bars: &[Bar], date: NaiveDate) -> Option<String> {
        let last = match bars.last() {
            Some(b) => b,
            None => return Some("no bars".into()),
        };
        if self.filter.require_bar_on_date && last.date != date {
            return Some(format!("no bar on {date}"));
        }
        if last.close < self.filter.min_close {
            return Some(format!("close {} below {}", last.close, self.filter.min_close));
        }
        if last.volume < self.filter.min_volume {
            return Some(format!("volume {} below {}", last.volume, self.filter.min_volume));
        }
        if bars.len() < self.filter.min_history {
            return Some(format!(
                "history {} bars below {}",
                bars.len(),
                self.filter.min_history
            ));
        }
        None
    }

    /// Rank a snapshot set under a parameter set. Pure and deterministic.
    ///
    /// Instruments missing any positively weighted factor are excluded, never
    /// imputed; percentile ranks are computed within the survivors only.
    pub fn rank(&self, set: &SnapshotSet, date: NaiveDate, params: &ParameterSet) -> Result<Ranking, ScoringError> {
        let mut weighted: Vec<(&FactorSpec, f64)> = Vec::new();
        for (name, &weight) in &params.factor_weights {
            let spec = self
                .factors
                .iter()
                .find(|f| &f.name == name)
                .ok_or_else(|| ScoringError::UnknownFactor(name.clone()))?;
            if weight > 0.0 {
                weighted.push((spec, weight));
            }
        }
        if weighted.is_empty() {
            return Err(ScoringError::NoWeightedFactors);
        }

        let mut exclusions = set.filtered.clone();
        let mut survivors: Vec<&FactorSnapshot> = Vec::with_capacity(set.snapshots.len());
        for snap in &set.snapshots {
            match weighted.iter().find(|(f, _)| !snap.values.contains_key(&f.name)) {
                Some((missing, _)) => {
                    let detail = set
                        .failures
                        .get(&snap.instrument)
                        .and_then(|m| m.get(&missing.name))
                        .cloned()
                        .unwrap_or_else(|| "not computed".into());
                    exclusions.push(Exclusion {
                        instrument: snap.instrument.clone(),
                        reason: ExclusionReason::MissingFactor {
                            factor: missing.name.clone(),
                            detail,
                        },
                    });
                }
                None => survivors.push(snap),
            }
        }

        let mut scores: Vec<RankScore> = survivors
            .iter()
            .map(|s| RankScore {
                instrument: s.instrument.clone(),
                date,
                ranks: BTreeMap::new(),
                composite: 0.0,
            })
            .collect();

        for (spec, weight) in &weighted {
            let raw: Vec<f64> = survivors.iter().map(|s| s.values[&spec.name]).collect();
            let ranks = percentile_ranks(&raw, spec.direction);
            for (score, rank) in scores.iter_mut().zip(ranks) {
                score.ranks.insert(spec.name.clone(), rank);
                score.composite += weight * rank;
            }
        }

        scores.sort_by(|a, b| {
            b.composite
                .total_cmp(&a.composite)
                .then_with(|| a.instrument.cmp(&b.instrument))
        });

        Ok(Ranking {
            date,
            scores,
            exclusions,
        })
    }

    /// `score(date, universe, parameters)`: snapshots then rank.
    pub fn score(
        &self,
        data: &dyn DataAccess,
        date: NaiveDate,
        universe: &[String],
        params: &ParameterSet,
    ) -> Result<Ranking, ScoringError> {
        let set = self.snapshots(data, date, universe);
        self.rank(&set, date, params)
    }
}

// ─── Per-run memo ───────────────────────────────────────────────────

/// Per-run cache of snapshot sets keyed by date.
///
/// Only valid for one engine, one data source and one universe. Entries are
/// always computed with `as_of = date`, so reusing them cannot leak later data.
#[derive(Debug, Default)]
pub struct SnapshotMemo {
    sets: RwLock<HashMap<NaiveDate, Arc<SnapshotSet>>>,
}

impl SnapshotMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &self,
        engine: &FactorScoringEngine,
        data: &dyn DataAccess,
        date: NaiveDate,
        universe: &[String],
    ) -> Arc<SnapshotSet> {
        if let Some(set) = self.sets.read().unwrap().get(&date) {
            return Arc::clone(set);
        }
        let set = Arc::new(engine.snapshots(data, date, universe));
        self.sets
            .write()
            .unwrap()
            .entry(date)
            .or_insert(set)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sets.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
