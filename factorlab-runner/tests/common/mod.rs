//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use std::path::Path;
use std::sync::Mutex;

use factorlab_core::data::{InMemoryStore, Observation};
use factorlab_core::domain::{Bar, ParameterSet};
use factorlab_runner::{EngineConfig, GridSearch, SearchSpace, SearchStrategy};

pub const DAYS: usize = 360;

pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
}

pub fn day(i: usize) -> NaiveDate {
    base_date() + Duration::days(i as i64)
}

/// Deterministic random walk per instrument.
fn walk(instrument: &str, seed: u64, n: usize) -> Vec<Bar> {
    let mut price = 15.0 + (seed % 20) as f64;
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(7);
    (0..n)
        .map(|i| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let change = ((state >> 33) % 300) as f64 / 100.0 - 1.45; // slight upward drift, percent
            let open = price;
            price = (price * (1.0 + change / 100.0)).max(6.0);
            Bar {
                instrument: instrument.to_string(),
                date: day(i),
                open,
                high: open.max(price) * 1.004,
                low: open.min(price) * 0.996,
                close: price,
                volume: 50_000,
            }
        })
        .collect()
}

/// `count` instruments with `DAYS` daily bars and monthly `pe` and `pb` series.
pub fn store(count: usize) -> InMemoryStore {
    let mut store = InMemoryStore::new();
    for k in 0..count {
        let sym = format!("T{k:02}");
        store.insert_bars(&sym, walk(&sym, k as u64 + 11, DAYS));
        let pe: Vec<Observation> = (0..DAYS)
            .step_by(30)
            .map(|i| Observation::new(day(i), 6.0 + ((k * 5 + i / 30) % 19) as f64))
            .collect();
        store.insert_fundamental(&sym, "pe", pe);
        let pb: Vec<Observation> = (0..DAYS)
            .step_by(30)
            .map(|i| Observation::new(day(i), 0.8 + ((k * 3 + i / 30) % 11) as f64 * 0.2))
            .collect();
        store.insert_fundamental(&sym, "pb", pb);
    }
    store
}

/// Four windows of 60/20 trading days stepping by 60, holdout from day 271.
pub const SINGLE_FACTOR: &str = r#"
[strategy]
name = "pe-only"
initial_capital = 100000.0

[[factors]]
name = "pe"
direction = "lower_is_better"
source = { kind = "fundamental", field = "pe" }

[search]
strategy = "grid"
grid_step = 0.5
position_counts = [3]
stop_loss_pcts = [0.08]
drawdown_control_pcts = [0.2]

[walk_forward]
start = "2022-01-03"
holdout_start = "2022-10-01"
holdout_end = "2022-12-26"
train_days = 60
validate_days = 20
step_days = 60

[acceptance]
finalist_count = 5
top_k = 3
max_passes = 2

[holdout]
overfit_tolerance = 10.0
max_holdout_rejections = 0
"#;

pub fn config(state_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::from_toml(SINGLE_FACTOR).unwrap();
    config.supervisor.state_dir = state_dir.to_path_buf();
    config
}

/// Two fundamental factors searched at random. Bands are wide enough to hold
/// the whole pool, so acceptance hinges on windows sharing one pool.
pub const TWO_FACTOR_RANDOM: &str = r#"
[strategy]
name = "pe-pb-random"
initial_capital = 100000.0

[[factors]]
name = "pe"
direction = "lower_is_better"
source = { kind = "fundamental", field = "pe" }

[[factors]]
name = "pb"
direction = "lower_is_better"
source = { kind = "fundamental", field = "pb" }

[search]
strategy = "random"
samples = 4
seed = 7
position_counts = [3]
stop_loss_pcts = [0.06, 0.08]
drawdown_control_pcts = [0.2]

[walk_forward]
start = "2022-01-03"
holdout_start = "2022-10-01"
holdout_end = "2022-12-26"
train_days = 60
validate_days = 20
step_days = 60

[acceptance]
finalist_count = 8
top_k = 8
max_weight_cv = 100.0
max_passes = 2

[holdout]
overfit_tolerance = 10.0
max_holdout_rejections = 0
"#;

pub fn random_config(state_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::from_toml(TWO_FACTOR_RANDOM).unwrap();
    config.supervisor.state_dir = state_dir.to_path_buf();
    config
}

pub fn pe_only(stop_loss_pct: f64) -> ParameterSet {
    ParameterSet::new([("pe".to_string(), 1.0)].into_iter().collect(), 3, stop_loss_pct, 0.2).unwrap()
}

/// What a search strategy was asked for.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub pass: usize,
    pub window: usize,
    pub space: SearchSpace,
}

type Script = Box<dyn Fn(&SearchSpace, usize, usize) -> Option<Vec<ParameterSet>> + Send + Sync>;

/// Grid search whose proposals can be overridden per (pass, window) and
/// which remembers every space it was handed.
pub struct ScriptedSearch {
    script: Script,
    seen: Mutex<Vec<Proposal>>,
}

impl ScriptedSearch {
    pub fn new(
        script: impl Fn(&SearchSpace, usize, usize) -> Option<Vec<ParameterSet>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn grid() -> Self {
        Self::new(|_, _, _| None)
    }

    pub fn proposals(&self) -> Vec<Proposal> {
        self.seen.lock().unwrap().clone()
    }

    pub fn space_in_pass(&self, pass: usize) -> SearchSpace {
        self.proposals()
            .into_iter()
            .find(|p| p.pass == pass)
            .map(|p| p.space)
            .unwrap()
    }
}

impl SearchStrategy for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    fn propose(&self, space: &SearchSpace, pass: usize, window: usize) -> Vec<ParameterSet> {
        self.seen.lock().unwrap().push(Proposal {
            pass,
            window,
            space: space.clone(),
        });
        (self.script)(space, pass, window).unwrap_or_else(|| GridSearch.propose(space, pass, window))
    }
}
