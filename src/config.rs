//! Benchmark configuration, persisted as TOML.
//!
//! Every section carries `#[serde(default)]` so a config file only needs the
//! keys it overrides. [`PoetConfig::load`] validates the result once; weight
//! groups that do not sum to 1 are rejected rather than renormalized.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::llm::LlmConfig;

/// Allowed deviation of a weight group's sum from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Check that a named weight group is finite, non-negative and sums to 1.
pub fn validate_weights(group: &str, weights: &[(&str, f64)]) -> ConfigResult<()> {
    for &(name, value) in weights {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidWeight {
                group: group.to_string(),
                name: name.to_string(),
                value,
            });
        }
    }
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigError::WeightSum {
            group: group.to_string(),
            sum,
        });
    }
    Ok(())
}

/// Top-level dimension weights for the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeights {
    pub efficiency_value: f64,
    pub quality_value: f64,
    pub strategic_value: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            efficiency_value: 0.30,
            quality_value: 0.50,
            strategic_value: 0.20,
        }
    }
}

impl DimensionWeights {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_weights(
            "weights",
            &[
                ("efficiency_value", self.efficiency_value),
                ("quality_value", self.quality_value),
                ("strategic_value", self.strategic_value),
            ],
        )
    }
}

/// Sub-weights of the quality dimension (RACE rubric score vs. FACT citation accuracy).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub race_score: f64,
    pub fact_score: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            race_score: 0.70,
            fact_score: 0.30,
        }
    }
}

impl QualityWeights {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_weights(
            "quality_weights",
            &[("race_score", self.race_score), ("fact_score", self.fact_score)],
        )
    }
}

/// Sub-weights of the efficiency dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EfficiencyWeights {
    pub time_weight: f64,
    pub cost_weight: f64,
    pub automation_weight: f64,
}

impl Default for EfficiencyWeights {
    fn default() -> Self {
        Self {
            time_weight: 0.40,
            cost_weight: 0.30,
            automation_weight: 0.30,
        }
    }
}

impl EfficiencyWeights {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_weights(
            "efficiency_weights",
            &[
                ("time_weight", self.time_weight),
                ("cost_weight", self.cost_weight),
                ("automation_weight", self.automation_weight),
            ],
        )
    }
}

/// Split of the normalized strategic score between task and knowledge capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategicWeights {
    pub task_capability: f64,
    pub knowledge_capability: f64,
}

impl Default for StrategicWeights {
    fn default() -> Self {
        Self {
            task_capability: 0.60,
            knowledge_capability: 0.40,
        }
    }
}

impl StrategicWeights {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_weights(
            "strategic_weights",
            &[
                ("task_capability", self.task_capability),
                ("knowledge_capability", self.knowledge_capability),
            ],
        )
    }
}

/// Time and hourly cost a human expert would need for an equivalent task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpertBaseline {
    pub time_hours: f64,
    pub hourly_rate_usd: f64,
}

impl ExpertBaseline {
    /// Total expert cost for the task.
    pub fn cost_usd(&self) -> f64 {
        self.time_hours * self.hourly_rate_usd
    }
}

/// Expert-time override for a task type (the rate still comes from the domain).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeBaseline {
    pub time_hours: f64,
}

/// Expert baseline tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpertConfig {
    pub default_time_hours: f64,
    pub default_hourly_rate_usd: f64,
    pub domains: BTreeMap<String, ExpertBaseline>,
    pub task_types: BTreeMap<String, TaskTypeBaseline>,
}

impl Default for ExpertConfig {
    fn default() -> Self {
        let domains = [
            ("finance", 3.0, 150.0),
            ("legal", 4.0, 200.0),
            ("medical", 5.0, 180.0),
            ("technology", 2.0, 120.0),
            ("marketing", 2.0, 100.0),
            ("general", 2.0, 100.0),
        ]
        .into_iter()
        .map(|(name, time_hours, hourly_rate_usd)| {
            (
                name.to_string(),
                ExpertBaseline {
                    time_hours,
                    hourly_rate_usd,
                },
            )
        })
        .collect();

        Self {
            default_time_hours: 2.0,
            default_hourly_rate_usd: 100.0,
            domains,
            task_types: BTreeMap::new(),
        }
    }
}

impl ExpertConfig {
    /// Resolve the baseline for a task.
    ///
    /// The domain entry wins, then the `general` entry, then the defaults.
    /// A matching task type replaces the expert time only.
    pub fn baseline_for(&self, domain: &str, task_type: Option<&str>) -> ExpertBaseline {
        let mut baseline = self
            .domains
            .get(domain)
            .or_else(|| self.domains.get("general"))
            .copied()
            .unwrap_or(ExpertBaseline {
                time_hours: self.default_time_hours,
                hourly_rate_usd: self.default_hourly_rate_usd,
            });

        if let Some(tt) = task_type.and_then(|t| self.task_types.get(t)) {
            baseline.time_hours = tt.time_hours;
        }
        baseline
    }

    fn validate(&self) -> ConfigResult<()> {
        check_non_negative("expert.default_time_hours", self.default_time_hours)?;
        check_non_negative("expert.default_hourly_rate_usd", self.default_hourly_rate_usd)?;
        for (name, b) in &self.domains {
            check_non_negative(&format!("expert.domains.{name}.time_hours"), b.time_hours)?;
            check_non_negative(
                &format!("expert.domains.{name}.hourly_rate_usd"),
                b.hourly_rate_usd,
            )?;
        }
        for (name, t) in &self.task_types {
            check_non_negative(&format!("expert.task_types.{name}.time_hours"), t.time_hours)?;
        }
        Ok(())
    }
}

/// Token prices in USD per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl Default for TokenPricing {
    fn default() -> Self {
        Self {
            input_cost_per_1k: 0.0015,
            output_cost_per_1k: 0.006,
        }
    }
}

impl TokenPricing {
    /// Cost of the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// Default and per-model token pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub models: BTreeMap<String, TokenPricing>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let TokenPricing {
            input_cost_per_1k,
            output_cost_per_1k,
        } = TokenPricing::default();
        Self {
            input_cost_per_1k,
            output_cost_per_1k,
            models: BTreeMap::new(),
        }
    }
}

impl PricingConfig {
    pub fn for_model(&self, model: Option<&str>) -> TokenPricing {
        model
            .and_then(|m| self.models.get(m))
            .copied()
            .unwrap_or(TokenPricing {
                input_cost_per_1k: self.input_cost_per_1k,
                output_cost_per_1k: self.output_cost_per_1k,
            })
    }

    fn validate(&self) -> ConfigResult<()> {
        check_non_negative("pricing.input_cost_per_1k", self.input_cost_per_1k)?;
        check_non_negative("pricing.output_cost_per_1k", self.output_cost_per_1k)?;
        for (name, p) in &self.models {
            check_non_negative(
                &format!("pricing.models.{name}.input_cost_per_1k"),
                p.input_cost_per_1k,
            )?;
            check_non_negative(
                &format!("pricing.models.{name}.output_cost_per_1k"),
                p.output_cost_per_1k,
            )?;
        }
        Ok(())
    }
}

/// Complexity levels run from 1 (simple) to 5 (expert).
pub const MIN_COMPLEXITY: u8 = 1;
pub const MAX_COMPLEXITY: u8 = 5;

/// Mapping from named complexity levels to numeric ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityConfig {
    pub default_level: u8,
    pub levels: BTreeMap<String, u8>,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        let levels = [
            ("simple", 1),
            ("moderate", 2),
            ("complex", 3),
            ("advanced", 4),
            ("expert", 5),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            default_level: 3,
            levels,
        }
    }
}

impl ComplexityConfig {
    /// Look up a named level, case-insensitively.
    pub fn resolve(&self, name: &str) -> Option<u8> {
        let key = name.trim().to_lowercase();
        self.levels.get(&key).copied()
    }

    fn validate(&self) -> ConfigResult<()> {
        let check = |field: String, level: u8| {
            if (MIN_COMPLEXITY..=MAX_COMPLEXITY).contains(&level) {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    field,
                    message: format!("level {level} is outside {MIN_COMPLEXITY}..={MAX_COMPLEXITY}"),
                })
            }
        };
        check("complexity.default_level".into(), self.default_level)?;
        for (name, &level) in &self.levels {
            check(format!("complexity.levels.{name}"), level)?;
        }
        Ok(())
    }
}

/// Batch execution and reporting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker pool size.
    pub max_workers: usize,
    /// Number of tasks listed in the report's top-N section.
    pub top_n: usize,
    /// Dimension means below this floor raise an improvement flag.
    pub improvement_floor: f64,
    /// Deadline for a single text-generation call.
    pub llm_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            top_n: 10,
            improvement_floor: 0.6,
            llm_timeout_secs: 120,
        }
    }
}

/// Knowledge store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Snapshot file.
    pub path: PathBuf,
    /// Number of most relevant prior units compared per new unit.
    pub consistency_window: usize,
    /// Upper bound on prior units credited as reused per task.
    pub reuse_cap: usize,
    /// Fail the task when the snapshot cannot be written, instead of
    /// continuing in memory.
    pub strict_persistence: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("poet_knowledge_base.json"),
            consistency_window: 10,
            reuse_cap: 5,
            strict_persistence: false,
        }
    }
}

/// Complete benchmark configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoetConfig {
    pub weights: DimensionWeights,
    pub quality_weights: QualityWeights,
    pub efficiency_weights: EfficiencyWeights,
    pub strategic_weights: StrategicWeights,
    pub expert: ExpertConfig,
    pub pricing: PricingConfig,
    pub complexity: ComplexityConfig,
    pub batch: BatchConfig,
    pub knowledge: KnowledgeConfig,
    pub llm: LlmConfig,
}

impl PoetConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse TOML text and validate.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Validate every weight group and table.
    pub fn validate(&self) -> ConfigResult<()> {
        self.weights.validate()?;
        self.quality_weights.validate()?;
        self.efficiency_weights.validate()?;
        self.strategic_weights.validate()?;
        self.expert.validate()?;
        self.pricing.validate()?;
        self.complexity.validate()?;

        if self.batch.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.max_workers".into(),
                message: "the worker pool needs at least one thread".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.batch.improvement_floor) {
            return Err(ConfigError::InvalidValue {
                field: "batch.improvement_floor".into(),
                message: format!("{} is outside [0, 1]", self.batch.improvement_floor),
            });
        }
        if self.batch.llm_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.llm_timeout_secs".into(),
                message: "a per-call deadline is mandatory".into(),
            });
        }
        if self.knowledge.consistency_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "knowledge.consistency_window".into(),
                message: "must compare against at least one prior unit".into(),
            });
        }
        Ok(())
    }
}

fn check_non_negative(field: &str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{value} must be a finite, non-negative number"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PoetConfig::default().validate().unwrap();
    }

    #[test]
    fn weights_summing_below_one_rejected() {
        let weights = DimensionWeights {
            efficiency_value: 0.3,
            quality_value: 0.4,
            strategic_value: 0.2,
        };
        let err = weights.validate().unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { .. }));
    }

    #[test]
    fn negative_weight_rejected() {
        let weights = EfficiencyWeights {
            time_weight: 1.2,
            cost_weight: -0.2,
            automation_weight: 0.0,
        };
        let err = weights.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWeight { ref name, .. } if name == "cost_weight"));
    }

    #[test]
    fn float_noise_within_tolerance() {
        validate_weights("w", &[("a", 0.1), ("b", 0.2), ("c", 0.7)]).unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PoetConfig::from_toml_str(
            r#"
            [weights]
            efficiency_value = 0.2
            quality_value = 0.4
            strategic_value = 0.4

            [batch]
            max_workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.weights.strategic_value, 0.4);
        assert_eq!(cfg.batch.max_workers, 8);
        assert_eq!(cfg.batch.top_n, 10);
        assert_eq!(cfg.efficiency_weights, EfficiencyWeights::default());
    }

    #[test]
    fn invalid_toml_weights_fail_at_load() {
        let err = PoetConfig::from_toml_str(
            r#"
            [quality_weights]
            race_score = 0.5
            fact_score = 0.4
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { ref group, .. } if group == "quality_weights"));
    }

    #[test]
    fn config_roundtrip_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("poet.toml");

        let mut cfg = PoetConfig::default();
        cfg.batch.max_workers = 2;
        cfg.pricing.models.insert(
            "gpt-4o".into(),
            TokenPricing {
                input_cost_per_1k: 0.005,
                output_cost_per_1k: 0.015,
            },
        );
        cfg.save(&path).unwrap();

        let loaded = PoetConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn baseline_lookup_order() {
        let mut expert = ExpertConfig::default();
        expert
            .task_types
            .insert("analysis_task".into(), TaskTypeBaseline { time_hours: 6.0 });

        let legal = expert.baseline_for("legal", None);
        assert_eq!(legal.time_hours, 4.0);
        assert_eq!(legal.hourly_rate_usd, 200.0);

        let unknown = expert.baseline_for("astronomy", None);
        assert_eq!(unknown.hourly_rate_usd, 100.0);

        let typed = expert.baseline_for("legal", Some("analysis_task"));
        assert_eq!(typed.time_hours, 6.0);
        assert_eq!(typed.hourly_rate_usd, 200.0);
    }

    #[test]
    fn pricing_falls_back_to_default() {
        let pricing = PricingConfig::default();
        let p = pricing.for_model(Some("unlisted"));
        assert_eq!(p, TokenPricing::default());
        assert!((p.cost(1000, 1000) - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = PoetConfig::default();
        cfg.batch.max_workers = 0;
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn named_complexity_resolves() {
        let c = ComplexityConfig::default();
        assert_eq!(c.resolve("Advanced"), Some(4));
        assert_eq!(c.resolve("unknown"), None);
    }
}
