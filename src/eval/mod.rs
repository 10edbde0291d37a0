//! Per-dimension evaluators.
//!
//! - [`efficiency`]: elapsed time and token cost against an expert baseline
//! - [`quality`]: externally computed rubric and citation scores
//! - [`strategic`]: model-judged capability plus knowledge extraction and reuse

pub mod efficiency;
pub mod prompts;
pub mod quality;
pub mod strategic;

pub use efficiency::{EfficiencyEvaluator, EfficiencyMetrics, EvaluatorState, estimate_tokens};
pub use quality::{QualityInput, QualityTable};
pub use strategic::{DegradedStep, StrategicEvaluator, StrategicInput, StrategicMetrics};
