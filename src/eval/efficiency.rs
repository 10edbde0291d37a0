//! Time, cost and automation measurement for a single task.
//!
//! An [`EfficiencyEvaluator`] is a two-state machine (`Idle` ⇄ `Running`).
//! Each evaluator measures one task at a time; concurrent tasks use one
//! evaluator each.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EfficiencyWeights, ExpertBaseline, TokenPricing};
use crate::error::{EvalError, EvalResult};

/// Token count heuristic used when a record carries no usage data.
const TOKENS_PER_WORD: f64 = 1.3;

/// Approximate token count of `text` (`words × 1.3`).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * TOKENS_PER_WORD) as u64
}

/// Lifecycle of an [`EfficiencyEvaluator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorState {
    Idle,
    Running,
}

impl EvaluatorState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
        }
    }
}

/// Immutable efficiency record of one finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyMetrics {
    pub task_id: String,
    pub task_title: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completion_time_seconds: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    pub expert_time_hours: f64,
    pub expert_hourly_rate_usd: f64,
    /// Share of the expert's time the agent saved, in `[0, 1]`.
    pub automation_rate: f64,
    pub cost_saving_usd: f64,
    pub task_success: bool,
    pub error_count: u32,
}

impl EfficiencyMetrics {
    pub fn completion_time_hours(&self) -> f64 {
        self.completion_time_seconds / 3600.0
    }

    pub fn expert_cost_usd(&self) -> f64 {
        self.expert_time_hours * self.expert_hourly_rate_usd
    }

    /// Hours saved relative to the expert, never negative.
    pub fn time_saving_hours(&self) -> f64 {
        (self.expert_time_hours - self.completion_time_hours()).max(0.0)
    }

    /// `max(0, 1 − elapsed/expert)`, or 0.5 without a baseline.
    pub fn time_efficiency(&self) -> f64 {
        if self.expert_time_hours > 0.0 {
            (1.0 - self.completion_time_hours() / self.expert_time_hours).max(0.0)
        } else {
            0.5
        }
    }

    /// `min(1, saving/expert_cost)`, or 0 when nothing was saved.
    pub fn cost_efficiency(&self) -> f64 {
        let expert_cost = self.expert_cost_usd();
        if expert_cost > 0.0 && self.cost_saving_usd > 0.0 {
            (self.cost_saving_usd / expert_cost).min(1.0)
        } else {
            0.0
        }
    }

    /// Weighted efficiency score in `[0, 1]`.
    pub fn score(&self, weights: &EfficiencyWeights) -> f64 {
        let score = weights.time_weight * self.time_efficiency()
            + weights.cost_weight * self.cost_efficiency()
            + weights.automation_weight * self.automation_rate;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Measures elapsed time and token usage of one task against an expert baseline.
#[derive(Debug)]
pub struct EfficiencyEvaluator {
    baseline: ExpertBaseline,
    pricing: TokenPricing,
    state: EvaluatorState,
    task_id: String,
    task_title: String,
    started_at: DateTime<Utc>,
    started: Option<Instant>,
    input_tokens: u64,
    output_tokens: u64,
    error_count: u32,
}

impl EfficiencyEvaluator {
    pub fn new(baseline: ExpertBaseline, pricing: TokenPricing) -> Self {
        Self {
            baseline,
            pricing,
            state: EvaluatorState::Idle,
            task_id: String::new(),
            task_title: String::new(),
            started_at: Utc::now(),
            started: None,
            input_tokens: 0,
            output_tokens: 0,
            error_count: 0,
        }
    }

    pub fn state(&self) -> EvaluatorState {
        self.state
    }

    /// Begin measuring a task. Resets token and error counters.
    pub fn start(&mut self, task_id: &str, task_title: &str) -> EvalResult<()> {
        self.expect(EvaluatorState::Idle)?;
        self.task_id = task_id.to_string();
        self.task_title = task_title.to_string();
        self.started_at = Utc::now();
        self.started = Some(Instant::now());
        self.input_tokens = 0;
        self.output_tokens = 0;
        self.error_count = 0;
        self.state = EvaluatorState::Running;
        tracing::debug!(task_id, "efficiency measurement started");
        Ok(())
    }

    /// Accumulate token usage.
    pub fn add_usage(&mut self, input_tokens: u64, output_tokens: u64) -> EvalResult<()> {
        self.expect(EvaluatorState::Running)?;
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        Ok(())
    }

    pub fn record_error(&mut self) -> EvalResult<()> {
        self.expect(EvaluatorState::Running)?;
        self.error_count += 1;
        Ok(())
    }

    /// Stop the clock and produce the metrics.
    pub fn finish(&mut self, success: bool) -> EvalResult<EfficiencyMetrics> {
        self.expect(EvaluatorState::Running)?;
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        self.finish_with_elapsed(success, elapsed)
    }

    /// Produce the metrics using an externally measured duration.
    pub fn finish_with_elapsed(
        &mut self,
        success: bool,
        elapsed: Duration,
    ) -> EvalResult<EfficiencyMetrics> {
        self.expect(EvaluatorState::Running)?;

        let completion_time_seconds = elapsed.as_secs_f64();
        let elapsed_hours = completion_time_seconds / 3600.0;
        let expert_time_hours = self.baseline.time_hours;
        let estimated_cost_usd = self.pricing.cost(self.input_tokens, self.output_tokens);

        let automation_rate = if expert_time_hours > 0.0 {
            (1.0 - elapsed_hours / expert_time_hours).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let cost_saving_usd = (self.baseline.cost_usd() - estimated_cost_usd).max(0.0);

        let metrics = EfficiencyMetrics {
            task_id: std::mem::take(&mut self.task_id),
            task_title: std::mem::take(&mut self.task_title),
            started_at: self.started_at,
            finished_at: Utc::now(),
            completion_time_seconds,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens.saturating_add(self.output_tokens),
            estimated_cost_usd,
            expert_time_hours,
            expert_hourly_rate_usd: self.baseline.hourly_rate_usd,
            automation_rate,
            cost_saving_usd,
            task_success: success,
            error_count: self.error_count,
        };

        self.state = EvaluatorState::Idle;
        self.started = None;
        tracing::debug!(
            task_id = %metrics.task_id,
            seconds = completion_time_seconds,
            cost_usd = estimated_cost_usd,
            "efficiency measurement finished"
        );
        Ok(metrics)
    }

    fn expect(&self, expected: EvaluatorState) -> EvalResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EvalError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(hours: f64, rate: f64) -> ExpertBaseline {
        ExpertBaseline {
            time_hours: hours,
            hourly_rate_usd: rate,
        }
    }

    #[test]
    fn half_time_tenth_cost_scores_point_six_two() {
        // Expert: 2h at $100/h = $200. Agent: 1h, $20 in tokens.
        let pricing = TokenPricing {
            input_cost_per_1k: 1.0,
            output_cost_per_1k: 0.0,
        };
        let mut eval = EfficiencyEvaluator::new(baseline(2.0, 100.0), pricing);
        eval.start("t1", "Market sizing").unwrap();
        eval.add_usage(20_000, 0).unwrap();
        let m = eval
            .finish_with_elapsed(true, Duration::from_secs(3600))
            .unwrap();

        assert!((m.automation_rate - 0.5).abs() < 1e-9);
        assert!((m.cost_efficiency() - 0.9).abs() < 1e-9);
        assert!((m.time_efficiency() - 0.5).abs() < 1e-9);
        let score = m.score(&EfficiencyWeights::default());
        assert!((score - 0.62).abs() < 1e-9, "score = {score}");
    }

    #[test]
    fn cost_follows_pricing() {
        let mut eval = EfficiencyEvaluator::new(baseline(2.0, 100.0), TokenPricing::default());
        eval.start("t", "").unwrap();
        eval.add_usage(2000, 500).unwrap();
        eval.add_usage(0, 500).unwrap();
        let m = eval.finish(true).unwrap();
        assert_eq!(m.total_tokens, 3000);
        // 2 × 0.0015 + 1 × 0.006
        assert!((m.estimated_cost_usd - 0.009).abs() < 1e-12);
    }

    #[test]
    fn slower_than_expert_has_zero_automation() {
        let mut eval = EfficiencyEvaluator::new(baseline(1.0, 100.0), TokenPricing::default());
        eval.start("t", "").unwrap();
        let m = eval
            .finish_with_elapsed(true, Duration::from_secs(3 * 3600))
            .unwrap();
        assert_eq!(m.automation_rate, 0.0);
        assert_eq!(m.time_efficiency(), 0.0);
        assert_eq!(m.time_saving_hours(), 0.0);
    }

    #[test]
    fn zero_expert_time_is_fully_automated() {
        let mut eval = EfficiencyEvaluator::new(baseline(0.0, 100.0), TokenPricing::default());
        eval.start("t", "").unwrap();
        let m = eval.finish(true).unwrap();
        assert_eq!(m.automation_rate, 1.0);
        assert_eq!(m.time_efficiency(), 0.5);
        assert_eq!(m.cost_efficiency(), 0.0);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let mut eval = EfficiencyEvaluator::new(baseline(100.0, 1000.0), TokenPricing::default());
        eval.start("t", "").unwrap();
        let m = eval.finish_with_elapsed(true, Duration::ZERO).unwrap();
        let s = m.score(&EfficiencyWeights::default());
        assert!((0.0..=1.0).contains(&s));
        assert!(s > 0.99);
    }

    #[test]
    fn state_transitions_are_enforced() {
        let mut eval = EfficiencyEvaluator::new(baseline(1.0, 1.0), TokenPricing::default());
        assert_eq!(eval.state(), EvaluatorState::Idle);
        assert!(matches!(
            eval.add_usage(1, 1).unwrap_err(),
            EvalError::InvalidState { expected: "running", actual: "idle" }
        ));
        assert!(eval.finish(true).is_err());

        eval.start("t", "").unwrap();
        assert!(matches!(
            eval.start("t2", "").unwrap_err(),
            EvalError::InvalidState { expected: "idle", actual: "running" }
        ));
        eval.record_error().unwrap();
        let m = eval.finish(false).unwrap();
        assert_eq!(m.error_count, 1);
        assert!(!m.task_success);
        assert_eq!(eval.state(), EvaluatorState::Idle);
    }

    #[test]
    fn restart_resets_counters() {
        let mut eval = EfficiencyEvaluator::new(baseline(1.0, 1.0), TokenPricing::default());
        eval.start("a", "").unwrap();
        eval.add_usage(100, 100).unwrap();
        eval.record_error().unwrap();
        eval.finish(true).unwrap();

        eval.start("b", "").unwrap();
        let m = eval.finish(true).unwrap();
        assert_eq!(m.task_id, "b");
        assert_eq!(m.total_tokens, 0);
        assert_eq!(m.error_count, 0);
    }

    #[test]
    fn token_estimate_scales_words() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }
}
