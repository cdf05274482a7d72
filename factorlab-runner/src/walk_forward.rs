//! Walk-forward optimization — rolling train/validate windows with stability checks.
//!
//! The optimizer is a state machine driven one step at a time:
//!
//! ```text
//! IDLE → SEARCHING(i) → EVALUATING(i) → ADVANCING → SEARCHING(i+1) … → SELECTING
//! SELECTING → (rejected) SEARCHING(0) of the next pass, expanded space
//! SELECTING → (accepted) HOLDOUT → DONE | (overfit) SEARCHING(0) with a penalty region
//! ```
//!
//! Each call to [`WalkForwardOptimizer::next_step`] runs one window, one pass
//! selection or one holdout validation, and returns exactly one step for the
//! supervisor to report. A window is never interrupted half way.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AcceptanceConfig, EngineConfig, HoldoutConfig, WalkForwardConfig};
use crate::error::FailureKind;
use crate::evaluator::{Evaluation, EvaluationError, Evaluator};
use crate::holdout::{HoldoutValidator, ValidationVerdict};
use crate::metrics::{mean_f64, PerformanceMetrics};
use crate::search::{strategy_from_config, PenaltyRegion, SearchSpace, SearchStrategy};
use factorlab_core::domain::{BacktestWindow, ParameterSet, ParamsHash, WindowError};

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("not enough trading days for one window: {available} available, {required} required")]
    NoWindows { available: usize, required: usize },
    #[error("invalid window: {0}")]
    Window(#[from] WindowError),
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("search strategy '{strategy}' proposed no candidates for window {window}")]
    NoCandidates { strategy: String, window: usize },
    #[error("optimizer already finished")]
    Finished,
}

// ─── Window generation ──────────────────────────────────────────────

/// Rolling windows over the trading calendar, all strictly before the holdout.
///
/// Train, validate and step lengths are counted in trading days of
/// `calendar` between `config.start` and the day before `holdout_start`.
pub fn generate_windows(
    calendar: &[NaiveDate],
    config: &WalkForwardConfig,
) -> Result<Vec<BacktestWindow>, WalkForwardError> {
    let mut days: Vec<NaiveDate> = calendar
        .iter()
        .copied()
        .filter(|d| *d >= config.start && *d < config.holdout_start)
        .collect();
    days.sort();
    days.dedup();

    let train = config.train_days;
    let span = train + config.validate_days;
    if span == 0 || days.len() < span {
        return Err(WalkForwardError::NoWindows {
            available: days.len(),
            required: span,
        });
    }

    let mut windows = Vec::new();
    let mut start = 0;
    while start + span <= days.len() {
        let window = BacktestWindow {
            train_start: days[start],
            train_end: days[start + train - 1],
            validate_start: days[start + train],
            validate_end: days[start + span - 1],
        };
        window.check(config.holdout_start)?;
        windows.push(window);
        start += config.step_days.max(1);
    }
    Ok(windows)
}

// ─── Step payloads ──────────────────────────────────────────────────

/// A finalist inside a window's tolerance band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandEntry {
    pub hash: ParamsHash,
    pub params: ParameterSet,
    pub validation: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub pass: usize,
    pub index: usize,
    pub window: BacktestWindow,
    pub candidates: usize,
    pub winner: ParameterSet,
    pub winner_hash: ParamsHash,
    pub train_metrics: PerformanceMetrics,
    pub validation_metrics: PerformanceMetrics,
    /// Top `top_k` finalists by validation objective, best first.
    pub band: Vec<BandEntry>,
}

/// Result of checking one complete pass for a stable candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass: usize,
    pub windows: usize,
    pub candidate: Option<ParameterSet>,
    pub candidate_hash: Option<ParamsHash>,
    /// Fraction of windows whose band contains the candidate.
    pub agreement: f64,
    /// Mean per-factor coefficient of variation of window winners' weights.
    pub weight_cv: f64,
    /// Candidate's mean validation metrics over the windows it appeared in.
    pub validation: PerformanceMetrics,
    pub accepted: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutOutcome {
    pub pass: usize,
    pub params: ParameterSet,
    pub hash: ParamsHash,
    pub summary: PassSummary,
    pub verdict: ValidationVerdict,
    /// Holdout rejections so far, including this one.
    pub rejections: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerStep {
    Window(WindowOutcome),
    PassRejected(PassSummary),
    Holdout(HoldoutOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerOutcome {
    Accepted {
        params: ParameterSet,
        verdict: ValidationVerdict,
    },
    Failed {
        kind: FailureKind,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "window", rename_all = "snake_case")]
pub enum OptimizerState {
    Idle,
    Searching(usize),
    Evaluating(usize),
    Advancing(usize),
    Selecting,
    Holdout,
    Done,
}

// ─── Pass selection (pure) ──────────────────────────────────────────

/// Mean per-factor coefficient of variation (population std / mean) of the
/// winners' weights. Factors no winner uses contribute 0.
pub fn weight_cv(winners: &[&ParameterSet], factors: &[String]) -> f64 {
    if winners.is_empty() || factors.is_empty() {
        return 0.0;
    }
    let cvs: Vec<f64> = factors
        .iter()
        .map(|f| {
            let values: Vec<f64> = winners.iter().map(|p| p.weight(f)).collect();
            let mean = mean_f64(&values);
            if mean <= 1e-12 {
                return 0.0;
            }
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            var.sqrt() / mean
        })
        .collect();
    mean_f64(&cvs)
}

fn mean_metrics(items: &[&PerformanceMetrics]) -> PerformanceMetrics {
    let avg = |f: fn(&PerformanceMetrics) -> f64| mean_f64(&items.iter().map(|m| f(m)).collect::<Vec<_>>());
    PerformanceMetrics {
        total_return: avg(|m| m.total_return),
        sharpe: avg(|m| m.sharpe),
        max_drawdown: avg(|m| m.max_drawdown),
        win_rate: avg(|m| m.win_rate),
        cagr: avg(|m| m.cagr),
        trade_count: items.iter().map(|m| m.trade_count).sum::<usize>() / items.len().max(1),
    }
}

/// Pick the candidate with the most band appearances across a pass and
/// decide whether it is stable enough to accept.
pub fn summarize_pass(
    pass: usize,
    outcomes: &[WindowOutcome],
    factors: &[String],
    acceptance: &AcceptanceConfig,
) -> PassSummary {
    let mut by_hash: BTreeMap<&ParamsHash, Vec<&BandEntry>> = BTreeMap::new();
    for outcome in outcomes {
        for entry in &outcome.band {
            by_hash.entry(&entry.hash).or_default().push(entry);
        }
    }

    // Most appearances, then higher mean validation Sharpe, then hash.
    let ranked: Vec<(&ParamsHash, &Vec<&BandEntry>, f64)> = by_hash
        .iter()
        .map(|(hash, entries)| {
            let sharpes: Vec<f64> = entries.iter().map(|e| e.validation.sharpe).collect();
            (*hash, entries, mean_f64(&sharpes))
        })
        .collect();
    let best = ranked.into_iter().max_by(|(ha, a, sa), (hb, b, sb)| {
        a.len()
            .cmp(&b.len())
            .then(sa.total_cmp(sb))
            .then(hb.cmp(ha))
    });

    let winners: Vec<&ParameterSet> = outcomes.iter().map(|o| &o.winner).collect();
    let cv = weight_cv(&winners, factors);
    let windows = outcomes.len();

    let Some((hash, entries, _)) = best else {
        return PassSummary {
            pass,
            windows,
            candidate: None,
            candidate_hash: None,
            agreement: 0.0,
            weight_cv: cv,
            validation: PerformanceMetrics::default(),
            accepted: false,
            reason: "no stable parameters found: no window produced a finalist".into(),
        };
    };

    let agreement = entries.len() as f64 / windows.max(1) as f64;
    let validation = mean_metrics(&entries.iter().map(|e| &e.validation).collect::<Vec<_>>());
    let agreed = agreement > acceptance.min_agreement;
    let stable = cv < acceptance.max_weight_cv;
    let reason = match (agreed, stable) {
        (true, true) => "stable parameters found".to_string(),
        (false, _) => format!(
            "no stable parameters found: agreement {agreement:.2} does not exceed {:.2}",
            acceptance.min_agreement
        ),
        (true, false) => format!(
            "no stable parameters found: weight cv {cv:.3} not below {:.3}",
            acceptance.max_weight_cv
        ),
    };

    PassSummary {
        pass,
        windows,
        candidate: Some(entries[0].params.clone()),
        candidate_hash: Some(hash.clone()),
        agreement,
        weight_cv: cv,
        validation,
        accepted: agreed && stable,
        reason,
    }
}

// ─── Optimizer ──────────────────────────────────────────────────────

pub struct WalkForwardOptimizer<'a> {
    evaluator: Evaluator<'a>,
    strategy: Box<dyn SearchStrategy>,
    base_space: SearchSpace,
    space: SearchSpace,
    windows: Vec<BacktestWindow>,
    factors: Vec<String>,
    acceptance: AcceptanceConfig,
    holdout_config: HoldoutConfig,
    holdout: HoldoutValidator,
    state: OptimizerState,
    /// Global pass number, 1-based, never reset.
    pass: usize,
    /// Passes rejected since the last holdout rejection.
    rejected_passes: usize,
    holdout_rejections: usize,
    outcomes: Vec<WindowOutcome>,
    outcome: Option<OptimizerOutcome>,
}

impl<'a> WalkForwardOptimizer<'a> {
    pub fn new(
        evaluator: Evaluator<'a>,
        strategy: Box<dyn SearchStrategy>,
        space: SearchSpace,
        walk_forward: &WalkForwardConfig,
        acceptance: AcceptanceConfig,
        holdout_config: HoldoutConfig,
    ) -> Result<Self, WalkForwardError> {
        let calendar = evaluator.trading_days(walk_forward.search_range());
        let windows = generate_windows(&calendar, walk_forward)?;
        info!(
            windows = windows.len(),
            first = %windows[0].train_start,
            last = %windows[windows.len() - 1].validate_end,
            strategy = strategy.name(),
            "walk-forward windows generated"
        );
        let holdout = HoldoutValidator::new(walk_forward.holdout_range(), holdout_config.overfit_tolerance);
        Ok(Self {
            evaluator,
            strategy,
            base_space: space.clone(),
            factors: space.factors.clone(),
            space,
            windows,
            acceptance,
            holdout_config,
            holdout,
            state: OptimizerState::Idle,
            pass: 1,
            rejected_passes: 0,
            holdout_rejections: 0,
            outcomes: Vec::new(),
            outcome: None,
        })
    }

    pub fn from_config(evaluator: Evaluator<'a>, config: &EngineConfig) -> Result<Self, WalkForwardError> {
        Self::with_strategy(evaluator, config, strategy_from_config(&config.search))
    }

    /// Like `from_config`, with a caller-supplied search strategy.
    pub fn with_strategy(
        evaluator: Evaluator<'a>,
        config: &EngineConfig,
        strategy: Box<dyn SearchStrategy>,
    ) -> Result<Self, WalkForwardError> {
        Self::new(
            evaluator,
            strategy,
            SearchSpace::from_config(config.factor_names(), &config.search),
            &config.walk_forward,
            config.acceptance.clone(),
            config.holdout.clone(),
        )
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    pub fn pass(&self) -> usize {
        self.pass
    }

    pub fn windows(&self) -> &[BacktestWindow] {
        &self.windows
    }

    pub fn evaluator(&self) -> &Evaluator<'a> {
        &self.evaluator
    }

    pub fn is_done(&self) -> bool {
        self.state == OptimizerState::Done
    }

    pub fn outcome(&self) -> Option<&OptimizerOutcome> {
        self.outcome.as_ref()
    }

    /// Run the next unit of work and return its report payload.
    pub fn next_step(&mut self) -> Result<OptimizerStep, WalkForwardError> {
        match self.state {
            OptimizerState::Done => Err(WalkForwardError::Finished),
            OptimizerState::Idle => {
                self.state = OptimizerState::Searching(0);
                self.run_window(0).map(OptimizerStep::Window)
            }
            OptimizerState::Searching(i)
            | OptimizerState::Evaluating(i)
            | OptimizerState::Advancing(i) => self.run_window(i).map(OptimizerStep::Window),
            OptimizerState::Selecting | OptimizerState::Holdout => self.select(),
        }
    }

    fn run_window(&mut self, index: usize) -> Result<WindowOutcome, WalkForwardError> {
        let window = self.windows[index];

        // ─── SEARCHING ───
        self.state = OptimizerState::Searching(index);
        let candidates = self.strategy.propose(&self.space, self.pass, index);
        if candidates.is_empty() {
            return Err(WalkForwardError::NoCandidates {
                strategy: self.strategy.name().to_string(),
                window: index,
            });
        }
        let trained = self.score_all(&candidates, &window, true)?;
        let finalists: Vec<ParameterSet> = trained
            .iter()
            .take(self.acceptance.finalist_count)
            .map(|(_, e)| e.params.clone())
            .collect();
        debug!(
            window = index,
            candidates = candidates.len(),
            finalists = finalists.len(),
            "training complete"
        );

        // ─── EVALUATING ───
        self.state = OptimizerState::Evaluating(index);
        let validated = self.score_all(&finalists, &window, false)?;
        let (_, best) = &validated[0];
        let train_metrics = trained
            .iter()
            .find(|(_, e)| e.hash == best.hash)
            .map(|(_, e)| e.metrics.clone())
            .unwrap_or_default();
        let band: Vec<BandEntry> = validated
            .iter()
            .take(self.acceptance.top_k)
            .map(|(_, e)| BandEntry {
                hash: e.hash.clone(),
                params: e.params.clone(),
                validation: e.metrics.clone(),
            })
            .collect();

        // ─── ADVANCING ───
        self.state = OptimizerState::Advancing(index);
        let outcome = WindowOutcome {
            pass: self.pass,
            index,
            window,
            candidates: candidates.len(),
            winner: best.params.clone(),
            winner_hash: best.hash.clone(),
            train_metrics,
            validation_metrics: best.metrics.clone(),
            band,
        };
        info!(
            pass = self.pass,
            window = index,
            train = %format!("{}..{}", window.train_start, window.train_end),
            validate = %format!("{}..{}", window.validate_start, window.validate_end),
            winner = %outcome.winner_hash.short(),
            sharpe = outcome.validation_metrics.sharpe,
            "window complete"
        );
        self.outcomes.push(outcome.clone());
        self.state = if index + 1 < self.windows.len() {
            OptimizerState::Searching(index + 1)
        } else {
            OptimizerState::Selecting
        };
        Ok(outcome)
    }

    /// Evaluate on the train or validate range and sort best first:
    /// objective desc, then max drawdown asc, then hash asc.
    fn score_all(
        &self,
        candidates: &[ParameterSet],
        window: &BacktestWindow,
        training: bool,
    ) -> Result<Vec<(f64, Evaluation)>, WalkForwardError> {
        let range = if training { window.train() } else { window.validate() };
        let mut scored = Vec::with_capacity(candidates.len());
        for result in self.evaluator.evaluate_all(candidates, range) {
            let evaluation = result?;
            let objective = self
                .strategy
                .evaluate(&evaluation.params, &evaluation.metrics, &self.space);
            scored.push((objective, evaluation));
        }
        scored.sort_by(|(oa, a), (ob, b)| {
            ob.total_cmp(oa)
                .then(a.metrics.max_drawdown.total_cmp(&b.metrics.max_drawdown))
                .then(a.hash.cmp(&b.hash))
        });
        Ok(scored)
    }

    fn select(&mut self) -> Result<OptimizerStep, WalkForwardError> {
        self.state = OptimizerState::Selecting;
        let summary = summarize_pass(self.pass, &self.outcomes, &self.factors, &self.acceptance);

        let accepted = if summary.accepted {
            summary.candidate.clone()
        } else {
            None
        };
        let Some(params) = accepted else {
            self.rejected_passes += 1;
            warn!(
                pass = self.pass,
                agreement = summary.agreement,
                weight_cv = summary.weight_cv,
                reason = %summary.reason,
                "pass rejected"
            );
            if self.rejected_passes >= self.acceptance.max_passes {
                self.finish(OptimizerOutcome::Failed {
                    kind: FailureKind::OptimizationFailed,
                    reason: format!(
                        "no stable parameters found after {} passes",
                        self.rejected_passes
                    ),
                });
            } else {
                self.space = self.space.expand();
                self.restart_pass();
            }
            return Ok(OptimizerStep::PassRejected(summary));
        };

        // ─── HOLDOUT ───
        self.state = OptimizerState::Holdout;
        let verdict = self
            .holdout
            .validate(&self.evaluator, &params, summary.validation.total_return)?;
        let hash = params.fingerprint();
        let rejections = self.holdout_rejections + usize::from(!verdict.accepted);
        let outcome = HoldoutOutcome {
            pass: self.pass,
            params: params.clone(),
            hash,
            summary,
            verdict: verdict.clone(),
            rejections,
        };

        if verdict.accepted {
            self.finish(OptimizerOutcome::Accepted { params, verdict });
        } else {
            self.holdout_rejections = rejections;
            if self.holdout_rejections > self.holdout_config.max_holdout_rejections {
                self.finish(OptimizerOutcome::Failed {
                    kind: FailureKind::OptimizationFailed,
                    reason: format!(
                        "holdout rejected {} times, last gap {:.4}",
                        self.holdout_rejections, verdict.overfit_gap
                    ),
                });
            } else {
                self.base_space.add_penalty(PenaltyRegion {
                    center: params,
                    radius: self.holdout_config.penalty_radius,
                    penalty: self.holdout_config.penalty,
                });
                self.space = self.base_space.clone();
                self.rejected_passes = 0;
                self.restart_pass();
            }
        }
        Ok(OptimizerStep::Holdout(outcome))
    }

    fn restart_pass(&mut self) {
        self.pass += 1;
        self.outcomes.clear();
        self.state = OptimizerState::Searching(0);
    }

    fn finish(&mut self, outcome: OptimizerOutcome) {
        match &outcome {
            OptimizerOutcome::Accepted { params, .. } => {
                info!(pass = self.pass, params = %params.fingerprint().short(), "parameters accepted")
            }
            OptimizerOutcome::Failed { reason, .. } => {
                warn!(pass = self.pass, reason = %reason, "optimization failed")
            }
        }
        self.outcome = Some(outcome);
        self.state = OptimizerState::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn weekdays(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
        use chrono::Datelike;
        let mut out = Vec::new();
        let mut d = start;
        while out.len() < n {
            if d.weekday().number_from_monday() <= 5 {
                out.push(d);
            }
            d += Duration::days(1);
        }
        out
    }

    fn wf(start: NaiveDate, holdout_start: NaiveDate, train: usize, validate: usize, step: usize) -> WalkForwardConfig {
        WalkForwardConfig {
            start,
            holdout_start,
            holdout_end: holdout_start + Duration::days(60),
            train_days: train,
            validate_days: validate,
            step_days: step,
        }
    }

    fn params(pe: f64, roe: f64) -> ParameterSet {
        ParameterSet::new(
            [("pe".to_string(), pe), ("roe".to_string(), roe)].into_iter().collect(),
            5,
            0.08,
            0.15,
        )
        .unwrap()
    }

    fn outcome(index: usize, winner: ParameterSet, band: &[(&ParameterSet, f64)]) -> WindowOutcome {
        let d = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        WindowOutcome {
            pass: 1,
            index,
            window: BacktestWindow {
                train_start: d,
                train_end: d + Duration::days(1),
                validate_start: d + Duration::days(2),
                validate_end: d + Duration::days(3),
            },
            candidates: 10,
            winner_hash: winner.fingerprint(),
            winner,
            train_metrics: PerformanceMetrics::default(),
            validation_metrics: PerformanceMetrics::default(),
            band: band
                .iter()
                .map(|(p, r)| BandEntry {
                    hash: p.fingerprint(),
                    params: (*p).clone(),
                    validation: PerformanceMetrics {
                        total_return: *r,
                        sharpe: *r * 10.0,
                        ..PerformanceMetrics::default()
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn windows_roll_by_step() {
        let cal = weekdays(NaiveDate::from_ymd_opt(2021, 1, 4).unwrap(), 100);
        let config = wf(cal[0], cal[90], 40, 10, 20);
        let windows = generate_windows(&cal, &config).unwrap();
        // 90 usable days, span 50, step 20 → starts 0, 20, 40
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].train_start, cal[0]);
        assert_eq!(windows[0].train_end, cal[39]);
        assert_eq!(windows[0].validate_start, cal[40]);
        assert_eq!(windows[1].train_start, cal[20]);
        assert_eq!(windows[2].validate_end, cal[89]);
    }

    #[test]
    fn too_short_calendar_is_error() {
        let cal = weekdays(NaiveDate::from_ymd_opt(2021, 1, 4).unwrap(), 30);
        let config = wf(cal[0], cal[29], 20, 10, 5);
        assert!(matches!(
            generate_windows(&cal, &config),
            Err(WalkForwardError::NoWindows { available: 29, required: 30 })
        ));
    }

    #[test]
    fn weight_cv_zero_for_identical_winners() {
        let p = params(0.5, 0.5);
        let factors = vec!["pe".to_string(), "roe".to_string()];
        assert_eq!(weight_cv(&[&p, &p, &p], &factors), 0.0);
        let q = params(1.0, 0.0001);
        assert!(weight_cv(&[&p, &q], &factors) > 0.0);
    }

    #[test]
    fn majority_band_candidate_is_accepted() {
        let a = params(0.6, 0.4);
        let b = params(0.5, 0.5);
        let outcomes = vec![
            outcome(0, a.clone(), &[(&a, 0.10), (&b, 0.05)]),
            outcome(1, a.clone(), &[(&a, 0.12)]),
            outcome(2, b.clone(), &[(&b, 0.09), (&a, 0.08)]),
        ];
        let factors = vec!["pe".to_string(), "roe".to_string()];
        let summary = summarize_pass(1, &outcomes, &factors, &AcceptanceConfig::default());
        assert!(summary.accepted, "{}", summary.reason);
        assert_eq!(summary.candidate.as_ref(), Some(&a));
        assert!((summary.agreement - 1.0).abs() < 1e-12);
        assert!((summary.validation.total_return - 0.10).abs() < 1e-12);
    }

    #[test]
    fn exactly_half_agreement_is_rejected() {
        let a = params(0.6, 0.4);
        let b = params(0.4, 0.6);
        let outcomes = vec![
            outcome(0, a.clone(), &[(&a, 0.10)]),
            outcome(1, b.clone(), &[(&b, 0.10)]),
        ];
        let factors = vec!["pe".to_string(), "roe".to_string()];
        let summary = summarize_pass(1, &outcomes, &factors, &AcceptanceConfig::default());
        assert_eq!(summary.agreement, 0.5);
        assert!(!summary.accepted);
        assert!(summary.reason.starts_with("no stable parameters found"));
    }

    #[test]
    fn unstable_weights_are_rejected_despite_agreement() {
        let a = params(0.9, 0.1);
        let b = params(0.1, 0.9);
        let outcomes = vec![
            outcome(0, a.clone(), &[(&a, 0.1), (&b, 0.1)]),
            outcome(1, b.clone(), &[(&b, 0.1), (&a, 0.1)]),
        ];
        let factors = vec!["pe".to_string(), "roe".to_string()];
        let summary = summarize_pass(1, &outcomes, &factors, &AcceptanceConfig::default());
        assert_eq!(summary.agreement, 1.0);
        assert!(summary.weight_cv >= 0.35);
        assert!(!summary.accepted);
    }
}
