//! ParameterSet — factor weights plus the risk knobs the simulator consumes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::ids::ParamsHash;

/// Tolerance for "weights sum to 1.0".
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// One candidate strategy configuration.
///
/// Uses `BTreeMap` so serialization (and therefore the fingerprint) has a
/// deterministic key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub factor_weights: BTreeMap<String, f64>,
    pub position_count: usize,
    pub stop_loss_pct: f64,
    pub drawdown_control_pct: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("factor weight for '{factor}' is not a finite non-negative number: {weight}")]
    InvalidWeight { factor: String, weight: f64 },
    #[error("factor weights sum to {sum}, expected 1.0")]
    WeightSum { sum: f64 },
    #[error("position_count must be at least 1")]
    NoPositions,
    #[error("{field} must be in (0, 1), got {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

impl ParameterSet {
    /// Build a parameter set, normalizing the weights so they sum to 1.0.
    pub fn new(
        weights: BTreeMap<String, f64>,
        position_count: usize,
        stop_loss_pct: f64,
        drawdown_control_pct: f64,
    ) -> Result<Self, ParamsError> {
        let params = Self {
            factor_weights: normalize_weights(&weights)?,
            position_count,
            stop_loss_pct,
            drawdown_control_pct,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check every invariant of a parameter set.
    pub fn validate(&self) -> Result<(), ParamsError> {
        for (factor, &weight) in &self.factor_weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ParamsError::InvalidWeight {
                    factor: factor.clone(),
                    weight,
                });
            }
        }
        let sum: f64 = self.factor_weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ParamsError::WeightSum { sum });
        }
        if self.position_count == 0 {
            return Err(ParamsError::NoPositions);
        }
        check_fraction("stop_loss_pct", self.stop_loss_pct)?;
        check_fraction("drawdown_control_pct", self.drawdown_control_pct)?;
        Ok(())
    }

    /// Weight of a factor (0.0 when the factor is absent).
    pub fn weight(&self, factor: &str) -> f64 {
        self.factor_weights.get(factor).copied().unwrap_or(0.0)
    }

    /// L1 distance between the weight vectors of two parameter sets.
    pub fn weight_distance(&self, other: &ParameterSet) -> f64 {
        let mut names: Vec<&String> = self.factor_weights.keys().collect();
        names.extend(other.factor_weights.keys());
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|n| (self.weight(n) - other.weight(n)).abs())
            .sum()
    }

    /// Exact identity: BLAKE3 of the canonical JSON serialization.
    pub fn fingerprint(&self) -> ParamsHash {
        // BTreeMap keys + fixed field order make the JSON canonical.
        let json = serde_json::to_string(self).unwrap_or_default();
        ParamsHash::from_bytes(json.as_bytes())
    }
}

/// Scale non-negative weights so they sum to 1.0.
pub fn normalize_weights(
    weights: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, f64>, ParamsError> {
    for (factor, &weight) in weights {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ParamsError::InvalidWeight {
                factor: factor.clone(),
                weight,
            });
        }
    }
    let sum: f64 = weights.values().sum();
    if sum <= 0.0 {
        return Err(ParamsError::WeightSum { sum });
    }
    Ok(weights
        .iter()
        .map(|(k, v)| (k.clone(), v / sum))
        .collect())
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ParamsError::OutOfRange { field, value })
    }
}
