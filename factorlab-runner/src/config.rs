//! Engine configuration — one TOML file describing a strategy run.
//!
//! Every section except `[[factors]]` and `[walk_forward]` has defaults, so a
//! minimal file only names the factors and the date boundaries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use factorlab_core::data::{DataAccess, RetryPolicy};
use factorlab_core::domain::{DateRange, FactorSpec};
use factorlab_core::scoring::{FactorScoringEngine, UniverseFilter};
use factorlab_core::simulator::SimulationRules;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySection {
    pub name: String,
    pub initial_capital: f64,
    /// Instruments to score; empty means every instrument the data source knows.
    pub universe: Vec<String>,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            name: "default".into(),
            initial_capital: 1_000_000.0,
            universe: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Grid,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub strategy: SearchKind,
    /// Weight increment of the grid simplex.
    pub grid_step: f64,
    /// Candidates drawn per window by the random strategy.
    pub samples: usize,
    pub seed: u64,
    pub position_counts: Vec<usize>,
    pub stop_loss_pcts: Vec<f64>,
    pub drawdown_control_pcts: Vec<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy: SearchKind::Grid,
            grid_step: 0.25,
            samples: 64,
            seed: 42,
            position_counts: vec![10],
            stop_loss_pcts: vec![0.08],
            drawdown_control_pcts: vec![0.15],
        }
    }
}

/// Rolling window geometry, measured in trading days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// First date any window may use.
    pub start: NaiveDate,
    pub holdout_start: NaiveDate,
    pub holdout_end: NaiveDate,
    #[serde(default = "default_train_days")]
    pub train_days: usize,
    #[serde(default = "default_validate_days")]
    pub validate_days: usize,
    #[serde(default = "default_step_days")]
    pub step_days: usize,
}

fn default_train_days() -> usize {
    252
}

fn default_validate_days() -> usize {
    63
}

fn default_step_days() -> usize {
    63
}

impl WalkForwardConfig {
    /// Everything the optimizer may look at: start through the day before holdout.
    pub fn search_range(&self) -> DateRange {
        DateRange::new(self.start, self.holdout_start.pred_opt().unwrap_or(self.holdout_start))
    }

    pub fn holdout_range(&self) -> DateRange {
        DateRange::new(self.holdout_start, self.holdout_end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceConfig {
    /// Candidates advanced from training to validation per window.
    pub finalist_count: usize,
    /// Size of each window's tolerance band.
    pub top_k: usize,
    /// Band appearances / windows must strictly exceed this.
    pub min_agreement: f64,
    /// Mean per-factor coefficient of variation of window winners' weights.
    pub max_weight_cv: f64,
    pub max_passes: usize,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            finalist_count: 5,
            top_k: 3,
            min_agreement: 0.5,
            max_weight_cv: 0.35,
            max_passes: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldoutConfig {
    pub overfit_tolerance: f64,
    /// L1 weight distance inside which rejected parameters are penalized.
    pub penalty_radius: f64,
    /// Sharpe points subtracted from candidates inside a penalty region.
    pub penalty: f64,
    pub max_holdout_rejections: usize,
}

impl Default for HoldoutConfig {
    fn default() -> Self {
        Self {
            overfit_tolerance: 0.05,
            penalty_radius: 0.2,
            penalty: 1.0,
            max_holdout_rejections: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub state_dir: PathBuf,
    pub lease_ttl_secs: u64,
    pub iteration_pause_ms: u64,
    /// Lease holder name; defaults to `<hostname-ish>-<pid>`.
    pub holder: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            lease_ttl_secs: 30,
            iteration_pause_ms: 0,
            holder: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding `bars.csv` and optional `fundamentals.csv`.
    pub dir: PathBuf,
    pub retry: RetryPolicy,
    /// Fundamentals older than this are treated as missing.
    pub max_staleness_days: Option<i64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            retry: RetryPolicy::default(),
            max_staleness_days: Some(400),
        }
    }
}

// ─── EngineConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub strategy: StrategySection,
    pub factors: Vec<FactorSpec>,
    #[serde(default)]
    pub universe: UniverseFilter,
    #[serde(default)]
    pub search: SearchConfig,
    pub walk_forward: WalkForwardConfig,
    #[serde(default)]
    pub acceptance: AcceptanceConfig,
    #[serde(default)]
    pub holdout: HoldoutConfig,
    #[serde(default)]
    pub simulation: SimulationRules,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub data: DataConfig,
}

impl EngineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.factors.is_empty() {
            return invalid("at least one [[factors]] entry is required");
        }
        let mut names = BTreeSet::new();
        for f in &self.factors {
            if !names.insert(f.name.as_str()) {
                return invalid(format!("duplicate factor name '{}'", f.name));
            }
        }
        if !(self.strategy.initial_capital.is_finite() && self.strategy.initial_capital > 0.0) {
            return invalid("strategy.initial_capital must be positive");
        }

        let wf = &self.walk_forward;
        if wf.start >= wf.holdout_start {
            return invalid("walk_forward.start must be before holdout_start");
        }
        if wf.holdout_start > wf.holdout_end {
            return invalid("walk_forward.holdout_end must not precede holdout_start");
        }
        if wf.train_days == 0 || wf.validate_days == 0 || wf.step_days == 0 {
            return invalid("walk_forward train/validate/step days must be positive");
        }

        let s = &self.search;
        if !(s.grid_step > 0.0 && s.grid_step <= 1.0) {
            return invalid("search.grid_step must be in (0, 1]");
        }
        if s.samples == 0 {
            return invalid("search.samples must be positive");
        }
        if s.position_counts.is_empty() || s.position_counts.contains(&0) {
            return invalid("search.position_counts must be non-empty and positive");
        }
        for (field, values) in [
            ("search.stop_loss_pcts", &s.stop_loss_pcts),
            ("search.drawdown_control_pcts", &s.drawdown_control_pcts),
        ] {
            if values.is_empty() || values.iter().any(|v| !(*v > 0.0 && *v < 1.0)) {
                return invalid(format!("{field} must be non-empty fractions in (0, 1)"));
            }
        }

        let a = &self.acceptance;
        if a.finalist_count == 0 || a.top_k == 0 || a.max_passes == 0 {
            return invalid("acceptance counts must be positive");
        }
        if !(0.0..1.0).contains(&a.min_agreement) {
            return invalid("acceptance.min_agreement must be in [0, 1)");
        }
        if !(a.max_weight_cv > 0.0) {
            return invalid("acceptance.max_weight_cv must be positive");
        }

        let h = &self.holdout;
        if !(h.overfit_tolerance >= 0.0 && h.penalty_radius >= 0.0 && h.penalty >= 0.0) {
            return invalid("holdout tolerances must be non-negative");
        }

        self.simulation
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("simulation: {e}")))?;
        if self.supervisor.lease_ttl_secs == 0 {
            return invalid("supervisor.lease_ttl_secs must be positive");
        }
        Ok(())
    }

    /// Content hash of the whole configuration.
    pub fn config_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }

    pub fn scoring_engine(&self) -> FactorScoringEngine {
        FactorScoringEngine::new(self.factors.clone(), self.universe.clone())
            .with_max_staleness(self.data.max_staleness_days)
    }

    /// Configured universe, or every instrument `data` knows when none is listed.
    pub fn resolve_universe(&self, data: &dyn DataAccess) -> Vec<String> {
        if self.strategy.universe.is_empty() {
            data.instruments()
        } else {
            self.strategy.universe.clone()
        }
    }

    pub fn factor_names(&self) -> Vec<String> {
        self.factors.iter().map(|f| f.name.clone()).collect()
    }

    pub fn holder_name(&self) -> String {
        self.supervisor
            .holder
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.strategy.name, std::process::id()))
    }

    // ─── State paths ───

    pub fn report_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("reports.jsonl")
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("reports.cursor")
    }

    pub fn lease_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("optimizer.lease")
    }

    pub fn tracker_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("portfolio.json")
    }

    pub fn trade_log_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("trades.jsonl")
    }

    pub fn accepted_params_path(&self) -> PathBuf {
        self.supervisor.state_dir.join("accepted_params.json")
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(msg.into()))
}
