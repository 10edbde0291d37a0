//! Rich diagnostic error types for poet-bench.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::llm::LlmError;

/// Top-level error type for poet-bench.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum PoetError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Knowledge(#[from] KnowledgeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Batch(#[from] BatchError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(poet::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(poet::config::parse),
        help(
            "Check the TOML syntax. Generate a fresh template with \
             `poet-bench config init <path>` and compare."
        )
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(poet::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{group} weights sum to {sum:.6}, expected 1.0")]
    #[diagnostic(
        code(poet::config::weight_sum),
        help(
            "Weights are never renormalized automatically. Adjust the values in \
             the [{group}] section so that they add up to exactly 1.0."
        )
    )]
    WeightSum { group: String, sum: f64 },

    #[error("{group}.{name} = {value} is not a valid weight")]
    #[diagnostic(
        code(poet::config::invalid_weight),
        help("Weights must be finite and non-negative.")
    )]
    InvalidWeight {
        group: String,
        name: String,
        value: f64,
    },

    #[error("invalid value for {field}: {message}")]
    #[diagnostic(
        code(poet::config::invalid_value),
        help("Fix the offending field in the configuration file.")
    )]
    InvalidValue { field: String, message: String },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Knowledge store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KnowledgeError {
    #[error("failed to persist knowledge snapshot {path}: {message}")]
    #[diagnostic(
        code(poet::knowledge::persist),
        help(
            "The snapshot could not be written. Check disk space and permissions, \
             or disable `knowledge.strict_persistence` to continue in memory."
        )
    )]
    Persist { path: String, message: String },

    #[error("failed to serialize knowledge snapshot: {message}")]
    #[diagnostic(
        code(poet::knowledge::serialize),
        help("A knowledge unit contains data that cannot be encoded as JSON.")
    )]
    Serialization { message: String },

    #[error("knowledge store lock poisoned")]
    #[diagnostic(
        code(poet::knowledge::poisoned),
        help(
            "A worker panicked while holding the knowledge store lock. \
             Restart the run; the on-disk snapshot holds the last complete state."
        )
    )]
    Poisoned,
}

/// Convenience alias for knowledge store results.
pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;

// ---------------------------------------------------------------------------
// Evaluation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EvalError {
    #[error("efficiency evaluator is {actual}, expected {expected}")]
    #[diagnostic(
        code(poet::eval::invalid_state),
        help(
            "Call `start` before recording usage and `finish` exactly once per task. \
             Use one evaluator per concurrent task."
        )
    )]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("task \"{task_id}\" is not evaluable: {message}")]
    #[diagnostic(
        code(poet::eval::invalid_task),
        help("Every task record needs a non-empty id, prompt and article.")
    )]
    InvalidTask { task_id: String, message: String },

    #[error("{dimension} score {value} is outside [0, 1]")]
    #[diagnostic(
        code(poet::eval::score_out_of_range),
        help(
            "Dimension scores must be normalized by the evaluator that produced \
             them before aggregation."
        )
    )]
    ScoreOutOfRange {
        dimension: &'static str,
        value: f64,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Knowledge(#[from] KnowledgeError),
}

/// Convenience alias for evaluation results.
pub type EvalResult<T> = std::result::Result<T, EvalError>;

// ---------------------------------------------------------------------------
// Batch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BatchError {
    #[error("failed to build worker pool with {workers} threads: {message}")]
    #[diagnostic(
        code(poet::batch::worker_pool),
        help("Lower --max-workers or check the process thread limit.")
    )]
    WorkerPool { workers: usize, message: String },

    #[error("failed to read task input {path}: {message}")]
    #[diagnostic(
        code(poet::batch::task_input),
        help("The input must be JSONL: one task object per line with id, prompt and article.")
    )]
    TaskInput { path: String, message: String },

    #[error("failed to read quality results {path}: {message}")]
    #[diagnostic(
        code(poet::batch::quality_input),
        help(
            "Quality tables are JSON arrays or JSONL records keyed by `task_id` \
             with `race_score` and/or `citation_accuracy` fields."
        )
    )]
    QualityInput { path: String, message: String },

    #[error("failed to write artifact {path}: {message}")]
    #[diagnostic(
        code(poet::batch::artifact),
        help("Check that the output directory is writable.")
    )]
    Artifact { path: String, message: String },
}

/// Convenience alias for batch results.
pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// Convenience alias for top-level results.
pub type PoetResult<T> = std::result::Result<T, PoetError>;
