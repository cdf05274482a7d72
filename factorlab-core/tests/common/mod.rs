//! Shared synthetic fixtures for integration tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use factorlab_core::data::{InMemoryStore, Observation};
use factorlab_core::domain::{Bar, FactorDirection, FactorSource, FactorSpec, ParameterSet};

pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
}

/// Deterministic pseudo-random walk (LCG), one series per instrument index.
pub fn make_bars(instrument: &str, seed: u64, n: usize) -> Vec<Bar> {
    let mut price = 20.0 + (seed % 30) as f64;
    let mut state = seed.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
    (0..n)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let change = ((state >> 33) % 200) as f64 / 100.0 - 1.0; // -1.0 .. +1.0 %
            let open = price;
            price = (price * (1.0 + change / 100.0)).max(6.0);
            let close = price;
            Bar {
                instrument: instrument.to_string(),
                date: base_date() + Duration::days(i as i64),
                open,
                high: open.max(close) * 1.005,
                low: open.min(close) * 0.995,
                close,
                volume: 10_000 + (i as u64 * 10),
            }
        })
        .collect()
}

/// `count` instruments with `n` daily bars plus monthly pe/roe fundamentals.
pub fn make_store(count: usize, n: usize) -> InMemoryStore {
    let mut store = InMemoryStore::new();
    for k in 0..count {
        let sym = format!("S{k:03}");
        store.insert_bars(&sym, make_bars(&sym, k as u64 + 1, n));
        let pe: Vec<Observation> = (0..n)
            .step_by(20)
            .map(|i| {
                Observation::new(
                    base_date() + Duration::days(i as i64),
                    8.0 + ((k * 7 + i) % 25) as f64,
                )
            })
            .collect();
        let roe: Vec<Observation> = (0..n)
            .step_by(20)
            .map(|i| {
                Observation::new(
                    base_date() + Duration::days(i as i64),
                    0.02 + ((k * 3 + i) % 17) as f64 / 100.0,
                )
            })
            .collect();
        store.insert_fundamental(&sym, "pe", pe);
        store.insert_fundamental(&sym, "roe", roe);
    }
    store
}

pub fn vqm_factors() -> Vec<FactorSpec> {
    vec![
        FactorSpec {
            name: "pe".into(),
            direction: FactorDirection::LowerIsBetter,
            source: FactorSource::Fundamental { field: "pe".into() },
        },
        FactorSpec {
            name: "roe".into(),
            direction: FactorDirection::HigherIsBetter,
            source: FactorSource::Fundamental { field: "roe".into() },
        },
        FactorSpec {
            name: "ret_5".into(),
            direction: FactorDirection::HigherIsBetter,
            source: FactorSource::Return { lookback: 5 },
        },
    ]
}

pub fn vqm_params() -> ParameterSet {
    ParameterSet::new(
        [
            ("pe".to_string(), 0.5),
            ("roe".to_string(), 0.3),
            ("ret_5".to_string(), 0.2),
        ]
        .into_iter()
        .collect(),
        3,
        0.08,
        0.15,
    )
    .unwrap()
}
