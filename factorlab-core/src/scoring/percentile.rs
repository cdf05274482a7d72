//! Cross-sectional percentile ranks.
//!
//! rank(i) = (#strictly worse + 0.5 × #others tied) / (n − 1)
//!
//! The best value maps to 1.0 and the worst to 0.0 regardless of factor
//! direction; a lone survivor gets 1.0.

use crate::domain::FactorDirection;

/// Percentile ranks of `values` in the same order as the input.
///
/// Values are expected to be finite (non-finite inputs are excluded upstream).
pub fn percentile_ranks(values: &[f64], direction: FactorDirection) -> Vec<f64> {
    let n = values.len();
    match n {
        0 => return Vec::new(),
        1 => return vec![1.0],
        _ => {}
    }

    // Map to "goodness" so that larger is always better.
    let goodness: Vec<f64> = values
        .iter()
        .map(|&v| match direction {
            FactorDirection::HigherIsBetter => v,
            FactorDirection::LowerIsBetter => -v,
        })
        .collect();

    let mut sorted = goodness.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let denom = (n - 1) as f64;
    goodness
        .iter()
        .map(|g| {
            let worse = sorted.partition_point(|s| s < g);
            let not_better = sorted.partition_point(|s| s <= g);
            let tied_others = not_better - worse - 1;
            (worse as f64 + 0.5 * tied_others as f64) / denom
        })
        .collect()
}
