//! Concurrent evaluation of a batch of task records.
//!
//! [`BatchCoordinator::run`] evaluates every record on a bounded `rayon`
//! pool. Each task is isolated: an error or panic becomes a [`TaskFailure`]
//! and the rest of the batch carries on. The knowledge store is the only
//! shared mutable state; configuration is read-only behind an `Arc`.

pub mod report;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};

use crate::aggregate::{CompositeResult, DimensionScores, ScoreAggregator};
use crate::config::{ComplexityConfig, MAX_COMPLEXITY, MIN_COMPLEXITY, PoetConfig};
use crate::error::{BatchError, BatchResult, ConfigResult, EvalError, EvalResult};
use crate::eval::{
    EfficiencyEvaluator, EfficiencyMetrics, QualityInput, QualityTable, StrategicEvaluator,
    StrategicInput, StrategicMetrics, estimate_tokens,
};
use crate::knowledge::KnowledgeStore;
use crate::llm::TextGenerator;

pub use report::{BatchReport, ReportOptions, TaskSummary, write_artifacts};

/// Completed tasks between progress log lines.
const PROGRESS_LOG_EVERY: usize = 10;

/// Complexity as written in a task record: a number or a named level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComplexityLevel {
    Level(i64),
    /// Fractional levels such as `3.0` from spreadsheet exports; rounded.
    Fractional(f64),
    Named(String),
}

impl ComplexityLevel {
    /// Numeric level in `1..=5`. Unknown names fall back to the default level.
    pub fn resolve(&self, config: &ComplexityConfig) -> u8 {
        let level = match self {
            Self::Level(n) => *n,
            Self::Fractional(x) if x.is_finite() => x.round() as i64,
            Self::Fractional(_) => config.default_level as i64,
            Self::Named(name) => match config.resolve(name) {
                Some(level) => level as i64,
                None => name.trim().parse().unwrap_or(config.default_level as i64),
            },
        };
        level.clamp(MIN_COMPLEXITY as i64, MAX_COMPLEXITY as i64) as u8
    }
}

fn default_domain() -> String {
    "general".into()
}

/// Task ids appear as strings or integers; both become a `String`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Text(s)) => s,
        Some(Id::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// One task to evaluate: the prompt given to the agent and its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "task_content")]
    pub prompt: String,
    #[serde(default, alias = "agent_output")]
    pub article: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub complexity_level: Option<ComplexityLevel>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub reference_output: Option<String>,
    /// Wall time the agent spent on the task, when it was measured.
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, article: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            article: article.into(),
            title: String::new(),
            domain: default_domain(),
            task_type: None,
            complexity_level: None,
            model_name: None,
            reference_output: None,
            elapsed_seconds: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Identifier used in failures; falls back to the batch position.
    fn label(&self, index: usize) -> String {
        if self.id.trim().is_empty() {
            format!("#{index}")
        } else {
            self.id.clone()
        }
    }

    fn validate(&self, label: &str) -> EvalResult<()> {
        let missing = [
            ("id", &self.id),
            ("prompt", &self.prompt),
            ("article", &self.article),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty());

        match missing {
            Some((field, _)) => Err(EvalError::InvalidTask {
                task_id: label.to_string(),
                message: format!("{field} is empty"),
            }),
            None => Ok(()),
        }
    }
}

/// Records read from a task file, plus the lines that could not be parsed.
#[derive(Debug, Clone, Default)]
pub struct LoadedTasks {
    pub tasks: Vec<TaskRecord>,
    /// One failure per unparseable line, keyed `line N`.
    pub rejected: Vec<TaskFailure>,
}

/// Read task records from a JSONL file. Blank lines are skipped.
///
/// A malformed line is rejected on its own; only an unreadable file fails.
/// `limit` counts both parsed and rejected records.
pub fn load_tasks(path: &Path, limit: Option<usize>) -> BatchResult<LoadedTasks> {
    let text = std::fs::read_to_string(path).map_err(|e| BatchError::TaskInput {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut loaded = LoadedTasks::default();
    for (i, line) in text.lines().enumerate() {
        if limit.is_some_and(|n| loaded.tasks.len() + loaded.rejected.len() >= n) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TaskRecord>(line) {
            Ok(task) => loaded.tasks.push(task),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = i + 1, error = %e, "rejected task record");
                loaded.rejected.push(TaskFailure {
                    task_id: format!("line {}", i + 1),
                    error: format!("invalid task record: {e}"),
                });
            }
        }
    }
    tracing::info!(
        path = %path.display(),
        tasks = loaded.tasks.len(),
        rejected = loaded.rejected.len(),
        "loaded tasks"
    );
    Ok(loaded)
}

/// Full evaluation of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvaluation {
    pub task_id: String,
    pub task_title: String,
    pub model_name: String,
    pub domain: String,
    pub complexity_level: u8,
    pub query_content: String,
    pub agent_output: String,
    pub efficiency: EfficiencyMetrics,
    pub quality: QualityInput,
    pub strategic: StrategicMetrics,
    pub composite: CompositeResult,
    pub evaluated_at: DateTime<Utc>,
    pub evaluation_duration_seconds: f64,
}

/// A task that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub error: String,
}

/// Everything a batch run produced, sorted by task id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub evaluations: Vec<TaskEvaluation>,
    pub failures: Vec<TaskFailure>,
    /// Tasks never started because the run was cancelled.
    pub skipped: Vec<String>,
}

impl BatchOutcome {
    /// Tasks whose strategic evaluation fell back to defaults.
    pub fn degraded_task_ids(&self) -> Vec<String> {
        self.evaluations
            .iter()
            .filter(|e| e.strategic.is_degraded())
            .map(|e| e.task_id.clone())
            .collect()
    }

    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.evaluations.iter().map(TaskSummary::from).collect()
    }

    /// Add records rejected at load time to the failure list.
    pub fn record_rejected(&mut self, rejected: impl IntoIterator<Item = TaskFailure>) {
        self.failures.extend(rejected);
        self.failures.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    }

    pub fn report(&self, model_name: &str, options: &ReportOptions) -> BatchReport {
        BatchReport::build(model_name, self, options)
    }
}

/// Point-in-time view of a running batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ProgressSnapshot {
    /// Tasks that reached a final state.
    pub fn settled(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

#[derive(Debug, Default)]
struct Progress {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Progress {
    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}

/// Stops a running batch from starting further tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum TaskResult {
    Done(Box<TaskEvaluation>),
    Failed(TaskFailure),
    Skipped(String),
}

/// Runs batches of tasks through the three evaluators and the aggregator.
#[derive(Debug)]
pub struct BatchCoordinator {
    config: Arc<PoetConfig>,
    aggregator: ScoreAggregator,
    strategic: StrategicEvaluator,
    progress: Arc<Progress>,
    cancel: CancelHandle,
}

impl BatchCoordinator {
    /// Validate `config` and wire the evaluators to the shared store.
    pub fn new(
        config: PoetConfig,
        generator: Arc<dyn TextGenerator>,
        store: Arc<KnowledgeStore>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let aggregator = ScoreAggregator::new(config.weights)?;
        let strategic = StrategicEvaluator::new(
            generator,
            store,
            Duration::from_secs(config.batch.llm_timeout_secs),
        )
        .with_reuse_cap(config.knowledge.reuse_cap);

        Ok(Self {
            config: Arc::new(config),
            aggregator,
            strategic,
            progress: Arc::new(Progress::default()),
            cancel: CancelHandle::default(),
        })
    }

    pub fn config(&self) -> &PoetConfig {
        &self.config
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Evaluate `tasks` on a pool of exactly `max_workers` threads.
    ///
    /// Returns once every task has completed, failed or been skipped.
    /// Only pool construction can fail the run as a whole.
    pub fn run(
        &self,
        tasks: &[TaskRecord],
        max_workers: usize,
        quality: Option<&QualityTable>,
    ) -> BatchResult<BatchOutcome> {
        if max_workers == 0 {
            return Err(BatchError::WorkerPool {
                workers: 0,
                message: "at least one worker is required".into(),
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|i| format!("poet-worker-{i}"))
            .build()
            .map_err(|e| BatchError::WorkerPool {
                workers: max_workers,
                message: e.to_string(),
            })?;

        self.progress.reset(tasks.len());
        let started = Instant::now();
        tracing::info!(tasks = tasks.len(), workers = max_workers, "batch started");

        let results: Vec<TaskResult> = pool.install(|| {
            tasks
                .par_iter()
                .enumerate()
                .map(|(index, task)| self.run_one(index, task, quality))
                .collect()
        });

        let mut outcome = BatchOutcome::default();
        for result in results {
            match result {
                TaskResult::Done(evaluation) => outcome.evaluations.push(*evaluation),
                TaskResult::Failed(failure) => outcome.failures.push(failure),
                TaskResult::Skipped(id) => outcome.skipped.push(id),
            }
        }
        outcome.evaluations.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        outcome.failures.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        outcome.skipped.sort();

        tracing::info!(
            evaluated = outcome.evaluations.len(),
            failed = outcome.failures.len(),
            skipped = outcome.skipped.len(),
            seconds = started.elapsed().as_secs_f64(),
            "batch finished"
        );
        Ok(outcome)
    }

    fn run_one(&self, index: usize, task: &TaskRecord, quality: Option<&QualityTable>) -> TaskResult {
        let label = task.label(index);
        if self.cancel.is_cancelled() {
            self.progress.skipped.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(task_id = %label, "batch cancelled, task skipped");
            return TaskResult::Skipped(label);
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(&label, task, quality)));
        let result = match result {
            Ok(Ok(evaluation)) => {
                self.progress.completed.fetch_add(1, Ordering::SeqCst);
                TaskResult::Done(Box::new(evaluation))
            }
            Ok(Err(e)) => {
                self.progress.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(task_id = %label, error = %e, "task evaluation failed");
                TaskResult::Failed(TaskFailure {
                    task_id: label,
                    error: e.to_string(),
                })
            }
            Err(payload) => {
                self.progress.failed.fetch_add(1, Ordering::SeqCst);
                let message = panic_message(payload.as_ref());
                tracing::error!(task_id = %label, panic = %message, "task evaluation panicked");
                TaskResult::Failed(TaskFailure {
                    task_id: label,
                    error: format!("panic: {message}"),
                })
            }
        };

        let snapshot = self.progress.snapshot();
        let done = snapshot.completed + snapshot.failed;
        if done % PROGRESS_LOG_EVERY == 0 {
            tracing::info!(done, total = snapshot.total, failed = snapshot.failed, "batch progress");
        }
        result
    }

    fn evaluate(
        &self,
        label: &str,
        task: &TaskRecord,
        quality: Option<&QualityTable>,
    ) -> EvalResult<TaskEvaluation> {
        task.validate(label)?;
        let started = Instant::now();
        let config = &self.config;
        tracing::info!(task_id = %task.id, domain = %task.domain, "task evaluation started");

        let complexity_level = task
            .complexity_level
            .as_ref()
            .map(|c| c.resolve(&config.complexity))
            .unwrap_or(config.complexity.default_level);

        let baseline = config.expert.baseline_for(&task.domain, task.task_type.as_deref());
        let pricing = config.pricing.for_model(task.model_name.as_deref());
        let mut efficiency = EfficiencyEvaluator::new(baseline, pricing);
        efficiency.start(&task.id, &task.title)?;
        efficiency.add_usage(
            task.input_tokens.unwrap_or_else(|| estimate_tokens(&task.prompt)),
            task.output_tokens.unwrap_or_else(|| estimate_tokens(&task.article)),
        )?;
        let efficiency = match task.elapsed_seconds.filter(|s| s.is_finite() && *s >= 0.0) {
            Some(secs) => {
                let elapsed = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
                efficiency.finish_with_elapsed(true, elapsed)?
            }
            None => efficiency.finish(true)?,
        };

        let strategic = self.strategic.evaluate(&StrategicInput {
            task_id: &task.id,
            task_title: &task.title,
            task_content: &task.prompt,
            agent_output: &task.article,
            domain: &task.domain,
            complexity_level,
            reference_output: task.reference_output.as_deref(),
            task_duration_minutes: efficiency.completion_time_seconds / 60.0,
        })?;

        let quality = quality
            .and_then(|table| table.get(&task.id))
            .copied()
            .unwrap_or_default();

        let composite = self.aggregator.composite(
            &task.id,
            DimensionScores {
                efficiency: efficiency.score(&config.efficiency_weights),
                quality: quality.score(&config.quality_weights),
                strategic: strategic.normalized_score(&config.strategic_weights),
            },
        )?;

        tracing::info!(task_id = %task.id, score = composite.overall_score, "task evaluation finished");

        Ok(TaskEvaluation {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            model_name: task.model_name.clone().unwrap_or_else(|| "unknown".into()),
            domain: task.domain.clone(),
            complexity_level,
            query_content: task.prompt.clone(),
            agent_output: task.article.clone(),
            efficiency,
            quality,
            strategic,
            composite,
            evaluated_at: Utc::now(),
            evaluation_duration_seconds: started.elapsed().as_secs_f64(),
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accepts_aliases_and_defaults() {
        let task: TaskRecord = serde_json::from_str(
            r#"{"id": "t1", "task_content": "Analyse X", "agent_output": "X is...", "complexity_level": "Advanced"}"#,
        )
        .unwrap();
        assert_eq!(task.prompt, "Analyse X");
        assert_eq!(task.article, "X is...");
        assert_eq!(task.domain, "general");
        let level = task.complexity_level.unwrap().resolve(&ComplexityConfig::default());
        assert_eq!(level, 4);
    }

    #[test]
    fn complexity_is_clamped() {
        let cfg = ComplexityConfig::default();
        assert_eq!(ComplexityLevel::Level(9).resolve(&cfg), 5);
        assert_eq!(ComplexityLevel::Level(-1).resolve(&cfg), 1);
        assert_eq!(ComplexityLevel::Named("2".into()).resolve(&cfg), 2);
        assert_eq!(ComplexityLevel::Named("bizarre".into()).resolve(&cfg), 3);
        assert_eq!(ComplexityLevel::Fractional(3.6).resolve(&cfg), 4);
        assert_eq!(ComplexityLevel::Fractional(42.0).resolve(&cfg), 5);
    }

    #[test]
    fn record_accepts_numeric_id_and_fractional_complexity() {
        let task: TaskRecord = serde_json::from_str(
            r#"{"id": 1, "prompt": "p", "article": "a", "complexity_level": 3.0}"#,
        )
        .unwrap();
        assert_eq!(task.id, "1");
        assert_eq!(task.complexity_level, Some(ComplexityLevel::Fractional(3.0)));
        assert_eq!(task.complexity_level.unwrap().resolve(&ComplexityConfig::default()), 3);

        let task: TaskRecord = serde_json::from_str(r#"{"id": null, "prompt": "p", "article": "a"}"#).unwrap();
        assert!(task.id.is_empty());
    }

    #[test]
    fn empty_fields_fail_validation() {
        let task = TaskRecord::new("t1", "prompt", "  ");
        let err = task.validate("t1").unwrap_err();
        assert!(matches!(err, EvalError::InvalidTask { ref message, .. } if message == "article is empty"));
        assert_eq!(TaskRecord::new("", "p", "a").label(7), "#7");
    }

    #[test]
    fn load_tasks_skips_blank_lines_and_honours_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(
            &path,
            "{\"id\": \"a\", \"prompt\": \"p\", \"article\": \"x\"}\n\n{\"id\": \"b\", \"prompt\": \"p\", \"article\": \"y\"}\n{\"id\": \"c\", \"prompt\": \"p\", \"article\": \"z\"}\n",
        )
        .unwrap();
        assert_eq!(load_tasks(&path, None).unwrap().tasks.len(), 3);
        let limited = load_tasks(&path, Some(2)).unwrap();
        assert_eq!(limited.tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn load_tasks_rejects_bad_line_and_keeps_the_rest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(
            &path,
            "{\"id\": \"a\"}\n{oops\n{\"id\": 7, \"prompt\": \"p\", \"article\": \"x\"}\n",
        )
        .unwrap();
        let loaded = load_tasks(&path, None).unwrap();
        assert_eq!(loaded.tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["a", "7"]);
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].task_id, "line 2");
        assert!(loaded.rejected[0].error.starts_with("invalid task record"));
    }

    #[test]
    fn missing_task_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_tasks(&dir.path().join("absent.jsonl"), None).unwrap_err();
        assert!(matches!(err, BatchError::TaskInput { .. }));
    }

    #[test]
    fn rejected_records_join_sorted_failures() {
        let mut outcome = BatchOutcome::default();
        outcome.failures.push(TaskFailure {
            task_id: "t9".into(),
            error: "x".into(),
        });
        outcome.record_rejected(vec![TaskFailure {
            task_id: "line 3".into(),
            error: "y".into(),
        }]);
        let ids: Vec<&str> = outcome.failures.iter().map(|f| f.task_id.as_str()).collect();
        assert_eq!(ids, vec!["line 3", "t9"]);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let payload = panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
    }
}
