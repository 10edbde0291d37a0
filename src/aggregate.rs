//! Weighted combination of the three dimension scores into one composite.

use serde::{Deserialize, Serialize};

use crate::config::DimensionWeights;
use crate::error::{ConfigResult, EvalError, EvalResult};

/// Normalized scores of the three value dimensions, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub efficiency: f64,
    pub quality: f64,
    pub strategic: f64,
}

impl DimensionScores {
    fn check(&self) -> EvalResult<()> {
        for (dimension, value) in [
            ("efficiency", self.efficiency),
            ("quality", self.quality),
            ("strategic", self.strategic),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EvalError::ScoreOutOfRange { dimension, value });
            }
        }
        Ok(())
    }
}

/// Composite result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub task_id: String,
    pub dimension_scores: DimensionScores,
    pub weights: DimensionWeights,
    pub overall_score: f64,
}

/// Combines dimension scores with validated weights.
#[derive(Debug, Clone, Copy)]
pub struct ScoreAggregator {
    weights: DimensionWeights,
}

impl ScoreAggregator {
    /// Weights must be non-negative and sum to 1 within tolerance.
    pub fn new(weights: DimensionWeights) -> ConfigResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &DimensionWeights {
        &self.weights
    }

    /// `Σ w_d · s_d`, rejecting inputs outside `[0, 1]`.
    pub fn aggregate(&self, efficiency: f64, quality: f64, strategic: f64) -> EvalResult<f64> {
        let scores = DimensionScores {
            efficiency,
            quality,
            strategic,
        };
        scores.check()?;
        Ok(self.combine(&scores))
    }

    pub fn composite(&self, task_id: &str, scores: DimensionScores) -> EvalResult<CompositeResult> {
        scores.check()?;
        Ok(CompositeResult {
            task_id: task_id.to_string(),
            dimension_scores: scores,
            weights: self.weights,
            overall_score: self.combine(&scores),
        })
    }

    fn combine(&self, s: &DimensionScores) -> f64 {
        let w = &self.weights;
        let overall =
            w.efficiency_value * s.efficiency + w.quality_value * s.quality + w.strategic_value * s.strategic;
        // Weights may sum to 1 ± tolerance.
        overall.clamp(0.0, 1.0)
    }
}
