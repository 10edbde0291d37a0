//! Batch summaries, the aggregate report, and the JSON artifacts on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchOutcome, TaskEvaluation};
use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult};

/// One line per evaluated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub model_name: String,
    pub domain: String,
    pub complexity_level: u8,
    pub overall_score: f64,
    pub efficiency_score: f64,
    pub quality_score: f64,
    pub strategic_score: f64,
    pub race_score: f64,
    pub fact_accuracy: f64,
    pub cost_saving_usd: f64,
    pub automation_rate: f64,
    pub knowledge_units_created: usize,
    pub degraded: bool,
}

impl From<&TaskEvaluation> for TaskSummary {
    fn from(e: &TaskEvaluation) -> Self {
        let scores = &e.composite.dimension_scores;
        Self {
            task_id: e.task_id.clone(),
            model_name: e.model_name.clone(),
            domain: e.domain.clone(),
            complexity_level: e.complexity_level,
            overall_score: e.composite.overall_score,
            efficiency_score: scores.efficiency,
            quality_score: scores.quality,
            strategic_score: scores.strategic,
            race_score: e.quality.race_score,
            fact_accuracy: e.quality.citation_accuracy,
            cost_saving_usd: e.efficiency.cost_saving_usd,
            automation_rate: e.efficiency.automation_rate,
            knowledge_units_created: e.strategic.created_knowledge_units,
            degraded: e.strategic.is_degraded(),
        }
    }
}

/// Report tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    pub top_n: usize,
    pub improvement_floor: f64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for ReportOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            top_n: config.top_n,
            improvement_floor: config.improvement_floor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub mean_overall: f64,
    pub min_overall: f64,
    pub max_overall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyStats {
    pub mean_score: f64,
    pub mean_time_savings_hours: f64,
    pub total_cost_savings_usd: f64,
    pub mean_automation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub mean_score: f64,
    pub mean_race_score: f64,
    pub mean_fact_accuracy: f64,
    pub total_effective_citations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicStats {
    pub mean_score: f64,
    pub mean_reasoning: f64,
    pub mean_domain_expertise: f64,
    pub total_knowledge_units: usize,
    pub mean_knowledge_quality: f64,
    pub mean_consistency: f64,
}

/// Overall-score statistics of a group of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub task_count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl GroupStats {
    fn of(scores: &[f64]) -> Self {
        Self {
            task_count: scores.len(),
            mean: mean(scores.iter().copied()),
            min: scores.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max: scores.iter().copied().reduce(f64::max).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTask {
    pub task_id: String,
    pub overall_score: f64,
    pub domain: String,
    pub complexity_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Efficiency,
    Quality,
    Strategic,
}

impl Dimension {
    fn recommendation(self) -> &'static str {
        match self {
            Self::Efficiency => "Improve efficiency: reduce completion time and raise the automation rate.",
            Self::Quality => "Improve quality: strengthen factual accuracy and citation quality.",
            Self::Strategic => "Strengthen strategic capability: deepen multi-step reasoning and knowledge capture.",
        }
    }
}

/// A dimension whose mean fell below the improvement floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementFlag {
    pub dimension: Dimension,
    pub mean_score: f64,
    pub floor: f64,
    pub recommendation: String,
}

/// Aggregate view of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub model_name: String,
    pub generated_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub efficiency: EfficiencyStats,
    pub quality: QualityStats,
    pub strategic: StrategicStats,
    pub by_domain: BTreeMap<String, GroupStats>,
    pub by_complexity: BTreeMap<String, GroupStats>,
    pub top_tasks: Vec<TopTask>,
    pub improvement_flags: Vec<ImprovementFlag>,
    pub failed_task_ids: Vec<String>,
    pub degraded_task_ids: Vec<String>,
    pub skipped_task_ids: Vec<String>,
}

impl BatchReport {
    pub fn build(model_name: &str, outcome: &BatchOutcome, options: &ReportOptions) -> Self {
        let evals = &outcome.evaluations;
        let overall: Vec<f64> = evals.iter().map(|e| e.composite.overall_score).collect();
        let all = GroupStats::of(&overall);

        let efficiency = EfficiencyStats {
            mean_score: mean(evals.iter().map(|e| e.composite.dimension_scores.efficiency)),
            mean_time_savings_hours: mean(evals.iter().map(|e| e.efficiency.time_saving_hours())),
            total_cost_savings_usd: evals.iter().map(|e| e.efficiency.cost_saving_usd).sum(),
            mean_automation_rate: mean(evals.iter().map(|e| e.efficiency.automation_rate)),
        };
        let quality = QualityStats {
            mean_score: mean(evals.iter().map(|e| e.composite.dimension_scores.quality)),
            mean_race_score: mean(evals.iter().map(|e| e.quality.race_score)),
            mean_fact_accuracy: mean(evals.iter().map(|e| e.quality.citation_accuracy)),
            total_effective_citations: evals.iter().map(|e| e.quality.effective_citations).sum(),
        };
        let strategic = StrategicStats {
            mean_score: mean(evals.iter().map(|e| e.composite.dimension_scores.strategic)),
            mean_reasoning: mean(evals.iter().map(|e| e.strategic.multi_step_reasoning)),
            mean_domain_expertise: mean(evals.iter().map(|e| e.strategic.domain_expertise)),
            total_knowledge_units: evals.iter().map(|e| e.strategic.created_knowledge_units).sum(),
            mean_knowledge_quality: mean(evals.iter().map(|e| e.strategic.knowledge_quality)),
            mean_consistency: mean(evals.iter().map(|e| e.strategic.knowledge_consistency)),
        };

        let mut domains: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut levels: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for e in evals {
            domains
                .entry(e.domain.clone())
                .or_default()
                .push(e.composite.overall_score);
            levels
                .entry(format!("level_{}", e.complexity_level))
                .or_default()
                .push(e.composite.overall_score);
        }

        let mut ranked: Vec<&TaskEvaluation> = evals.iter().collect();
        ranked.sort_by(|a, b| {
            b.composite
                .overall_score
                .total_cmp(&a.composite.overall_score)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        let top_tasks = ranked
            .into_iter()
            .take(options.top_n)
            .map(|e| TopTask {
                task_id: e.task_id.clone(),
                overall_score: e.composite.overall_score,
                domain: e.domain.clone(),
                complexity_level: e.complexity_level,
            })
            .collect();

        let improvement_flags = if evals.is_empty() {
            Vec::new()
        } else {
            [
                (Dimension::Efficiency, efficiency.mean_score),
                (Dimension::Quality, quality.mean_score),
                (Dimension::Strategic, strategic.mean_score),
            ]
            .into_iter()
            .filter(|&(_, m)| m < options.improvement_floor)
            .map(|(dimension, mean_score)| ImprovementFlag {
                dimension,
                mean_score,
                floor: options.improvement_floor,
                recommendation: dimension.recommendation().to_string(),
            })
            .collect()
        };

        Self {
            model_name: model_name.to_string(),
            generated_at: Utc::now(),
            summary: RunSummary {
                total_tasks: evals.len() + outcome.failures.len() + outcome.skipped.len(),
                evaluated: evals.len(),
                failed: outcome.failures.len(),
                skipped: outcome.skipped.len(),
                mean_overall: all.mean,
                min_overall: all.min,
                max_overall: all.max,
            },
            efficiency,
            quality,
            strategic,
            by_domain: domains.into_iter().map(|(k, v)| (k, GroupStats::of(&v))).collect(),
            by_complexity: levels.into_iter().map(|(k, v)| (k, GroupStats::of(&v))).collect(),
            top_tasks,
            improvement_flags,
            failed_task_ids: outcome.failures.iter().map(|f| f.task_id.clone()).collect(),
            degraded_task_ids: outcome.degraded_task_ids(),
            skipped_task_ids: outcome.skipped.clone(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Files written by [`write_artifacts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub detailed: PathBuf,
    pub summary: PathBuf,
    pub report: PathBuf,
}

/// Write `{model}_poet_detailed.json`, `{model}_poet_summary.json` and
/// `{model}_poet_report.json` into `dir`.
pub fn write_artifacts(
    outcome: &BatchOutcome,
    report: &BatchReport,
    dir: &Path,
    model_name: &str,
) -> BatchResult<ArtifactPaths> {
    std::fs::create_dir_all(dir).map_err(|e| BatchError::Artifact {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    let stem = file_stem(model_name);
    let paths = ArtifactPaths {
        detailed: dir.join(format!("{stem}_poet_detailed.json")),
        summary: dir.join(format!("{stem}_poet_summary.json")),
        report: dir.join(format!("{stem}_poet_report.json")),
    };

    write_json(&paths.detailed, &outcome.evaluations)?;
    write_json(&paths.summary, &outcome.summaries())?;
    write_json(&paths.report, report)?;

    tracing::info!(dir = %dir.display(), model = model_name, "artifacts written");
    Ok(paths)
}

/// Model names like `org/model` must not create subdirectories.
fn file_stem(model_name: &str) -> String {
    let stem: String = model_name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect();
    if stem.trim().is_empty() { "model".into() } else { stem }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> BatchResult<()> {
    let err = |message: String| BatchError::Artifact {
        path: path.display().to_string(),
        message,
    };
    let json = serde_json::to_string_pretty(value).map_err(|e| err(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| err(e.to_string()))
}
