//! Raw factor computation from point-in-time data.
//!
//! Every value is derived from data read with `as_of = date`; any bar or
//! observation dated later is a look-ahead error and the factor is reported
//! missing for that instrument.

use chrono::NaiveDate;

use crate::data::{ensure_point_in_time, latest_fresh, DataAccess, DataError, Observation};
use crate::domain::{Bar, FactorSource, FactorSpec};

/// Compute one factor's raw value for `instrument` on `date`.
///
/// `bars` must be the instrument's recent history read with `as_of = date`
/// (at least `source.bars_required()` of them for price factors).
pub fn compute_factor(
    data: &dyn DataAccess,
    spec: &FactorSpec,
    instrument: &str,
    date: NaiveDate,
    bars: &[Bar],
    max_staleness_days: Option<i64>,
) -> Result<f64, DataError> {
    let value = match &spec.source {
        FactorSource::Fundamental { field } => {
            let series = data.get_series(instrument, field, date)?;
            latest_fresh(instrument, field, &series, date, max_staleness_days)?.value
        }
        source => {
            check_bars(instrument, &spec.name, bars, date)?;
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let missing = || DataError::Missing {
                instrument: instrument.to_string(),
                field: spec.name.clone(),
                as_of: date,
            };
            let computed = match source {
                FactorSource::Return { lookback } => trailing_return(&closes, *lookback),
                FactorSource::Volatility { lookback } => volatility(&closes, *lookback),
                FactorSource::PricePosition { lookback } => price_position(bars, *lookback),
                FactorSource::MomentumAcceleration { short, long } => {
                    momentum_acceleration(&closes, *short, *long)
                }
                FactorSource::Fundamental { .. } => None,
            };
            computed.ok_or_else(missing)?
        }
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DataError::Missing {
            instrument: instrument.to_string(),
            field: spec.name.clone(),
            as_of: date,
        })
    }
}

fn check_bars(instrument: &str, field: &str, bars: &[Bar], as_of: NaiveDate) -> Result<(), DataError> {
    let obs: Vec<Observation> = bars
        .iter()
        .map(|b| Observation::new(b.date, b.close))
        .collect();
    ensure_point_in_time(instrument, field, &obs, as_of)
}

/// close[t] / close[t − lookback] − 1.
pub fn trailing_return(closes: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || closes.len() < lookback + 1 {
        return None;
    }
    let last = *closes.last()?;
    let base = closes[closes.len() - 1 - lookback];
    if base <= 0.0 {
        return None;
    }
    Some(last / base - 1.0)
}

/// Sample standard deviation of the last `lookback` daily close returns.
pub fn volatility(closes: &[f64], lookback: usize) -> Option<f64> {
    if lookback < 2 || closes.len() < lookback + 1 {
        return None;
    }
    let window = &closes[closes.len() - 1 - lookback..];
    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

/// (close − lowest low) / (highest high − lowest low) over the last `lookback` bars.
/// A flat range maps to the midpoint.
pub fn price_position(bars: &[Bar], lookback: usize) -> Option<f64> {
    if lookback == 0 || bars.len() < lookback {
        return None;
    }
    let window = &bars[bars.len() - lookback..];
    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let close = window.last()?.close;
    if high > low {
        Some((close - low) / (high - low))
    } else {
        Some(0.5)
    }
}

/// Short-horizon return minus the long-horizon return scaled to the short horizon.
pub fn momentum_acceleration(closes: &[f64], short: usize, long: usize) -> Option<f64> {
    if long == 0 {
        return None;
    }
    let short_ret = trailing_return(closes, short)?;
    let long_ret = trailing_return(closes, long)?;
    Some(short_ret - long_ret * short as f64 / long as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryStore;
    use crate::domain::FactorDirection;

    fn bars_from(closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                instrument: "A".into(),
                date: start + chrono::Duration::days(i as i64),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 1_000,
            })
            .collect()
    }

    #[test]
    fn trailing_return_basic() {
        let r = trailing_return(&[100.0, 105.0, 110.0], 2).unwrap();
        assert!((r - 0.10).abs() < 1e-12);
        assert!(trailing_return(&[100.0, 105.0], 2).is_none());
    }

    #[test]
    fn volatility_of_constant_series_is_zero() {
        let v = volatility(&[10.0; 21], 20).unwrap();
        assert!(v.abs() < 1e-12);
    }

    #[test]
    fn price_position_bounds() {
        let bars = bars_from(&[10.0, 12.0, 11.0]);
        let p = price_position(&bars, 3).unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn momentum_acceleration_scales_long_leg() {
        // closes: ret over 1 bar = 10%, ret over 2 bars = 21%
        let m = momentum_acceleration(&[100.0, 110.0, 121.0], 1, 2).unwrap();
        assert!((m - (0.10 - 0.21 / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn look_ahead_bar_is_rejected() {
        let store = InMemoryStore::new();
        let bars = bars_from(&[100.0, 101.0, 102.0]);
        let spec = FactorSpec {
            name: "ret_1".into(),
            direction: FactorDirection::HigherIsBetter,
            source: FactorSource::Return { lookback: 1 },
        };
        let as_of = bars[1].date;
        let err = compute_factor(&store, &spec, "A", as_of, &bars, None).unwrap_err();
        assert!(matches!(err, DataError::LookAhead { .. }));
    }

    #[test]
    fn insufficient_history_is_missing() {
        let store = InMemoryStore::new();
        let bars = bars_from(&[100.0, 101.0]);
        let spec = FactorSpec {
            name: "ret_20".into(),
            direction: FactorDirection::HigherIsBetter,
            source: FactorSource::Return { lookback: 20 },
        };
        let as_of = bars[1].date;
        let err = compute_factor(&store, &spec, "A", as_of, &bars, None).unwrap_err();
        assert!(matches!(err, DataError::Missing { .. }));
    }
}
