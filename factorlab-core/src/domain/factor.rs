//! Factor definitions, raw snapshots and rank scores.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which end of a factor's distribution is preferred.
///
/// Both directions are mapped onto percentile ranks where 1.0 is always the
/// most attractive instrument, so composite scores are "higher is better".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorDirection {
    /// Smaller raw values are better (e.g. valuation multiples, volatility).
    #[serde(alias = "ascending")]
    LowerIsBetter,
    /// Larger raw values are better (e.g. profitability, momentum).
    #[serde(alias = "descending")]
    HigherIsBetter,
}

/// Where a factor's raw value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactorSource {
    /// Latest value of a fundamental field (pe, pb, roe, ...).
    Fundamental { field: String },
    /// Close-to-close return over `lookback` bars.
    Return { lookback: usize },
    /// Standard deviation of daily close returns over `lookback` bars.
    Volatility { lookback: usize },
    /// Position of the last close inside the `lookback` high/low range, in [0, 1].
    PricePosition { lookback: usize },
    /// Short-horizon return minus the long-horizon return scaled to the short horizon.
    MomentumAcceleration { short: usize, long: usize },
}

impl FactorSource {
    /// Number of bars (including the as-of bar) needed to compute this factor.
    /// Fundamentals need no bars.
    pub fn bars_required(&self) -> usize {
        match self {
            FactorSource::Fundamental { .. } => 0,
            FactorSource::Return { lookback } => lookback + 1,
            FactorSource::Volatility { lookback } => lookback + 1,
            FactorSource::PricePosition { lookback } => *lookback,
            FactorSource::MomentumAcceleration { short, long } => short.max(long) + 1,
        }
    }
}

/// A configured ranking factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSpec {
    pub name: String,
    pub direction: FactorDirection,
    pub source: FactorSource,
}

/// Raw factor values for one instrument on one date.
///
/// Never persisted: recomputed from data read with `as_of = date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSnapshot {
    pub instrument: String,
    pub date: NaiveDate,
    pub values: BTreeMap<String, f64>,
}

/// Percentile ranks and the weighted composite for one instrument on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankScore {
    pub instrument: String,
    pub date: NaiveDate,
    pub ranks: BTreeMap<String, f64>,
    pub composite: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_accepts_ascending_alias() {
        let d: FactorDirection = serde_json::from_str("\"ascending\"").unwrap();
        assert_eq!(d, FactorDirection::LowerIsBetter);
        let d: FactorDirection = serde_json::from_str("\"higher_is_better\"").unwrap();
        assert_eq!(d, FactorDirection::HigherIsBetter);
    }

    #[test]
    fn source_tagged_serialization() {
        let src = FactorSource::Return { lookback: 20 };
        let json = serde_json::to_string(&src).unwrap();
        assert_eq!(json, r#"{"kind":"return","lookback":20}"#);
    }

    #[test]
    fn bars_required_per_source() {
        assert_eq!(FactorSource::Fundamental { field: "pe".into() }.bars_required(), 0);
        assert_eq!(FactorSource::Return { lookback: 20 }.bars_required(), 21);
        assert_eq!(
            FactorSource::MomentumAcceleration { short: 20, long: 60 }.bars_required(),
            61
        );
    }
}
