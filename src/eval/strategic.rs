//! Strategic value: task capability, knowledge capability and knowledge reuse.
//!
//! One evaluation makes three text-generation calls (task capability,
//! knowledge extraction, knowledge capability). The generator is untrusted:
//! a failed, late or unparseable answer never fails the task. The affected
//! step falls back to neutral defaults and is listed in
//! [`StrategicMetrics::degraded_steps`]. Only knowledge store faults
//! propagate.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::StrategicWeights;
use crate::error::EvalResult;
use crate::eval::prompts;
use crate::knowledge::{KnowledgeQuery, KnowledgeStore, KnowledgeUnit, MAX_QUALITY};
use crate::llm::extract::extract_object;
use crate::llm::{TextGenerator, extract_json, generate_with_deadline};

/// Sub-score used when the generator gives no usable value.
pub const NEUTRAL_SCORE: f64 = 3.0;

/// Default upper bound on prior units credited as reused per task.
pub const DEFAULT_REUSE_CAP: usize = 5;

/// An evaluation step that fell back to defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedStep {
    TaskCapability,
    KnowledgeExtraction,
    KnowledgeCapability,
}

impl std::fmt::Display for DegradedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::TaskCapability => "task_capability",
            Self::KnowledgeExtraction => "knowledge_extraction",
            Self::KnowledgeCapability => "knowledge_capability",
        })
    }
}

/// Inputs of one strategic evaluation.
#[derive(Debug, Clone, Copy)]
pub struct StrategicInput<'a> {
    pub task_id: &'a str,
    pub task_title: &'a str,
    pub task_content: &'a str,
    pub agent_output: &'a str,
    pub domain: &'a str,
    pub complexity_level: u8,
    pub reference_output: Option<&'a str>,
    pub task_duration_minutes: f64,
}

/// Strategic value record of one task. Sub-scores are on a 0–5 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicMetrics {
    pub task_id: String,
    pub task_title: String,
    pub complexity_level: u8,
    pub task_duration_minutes: f64,

    pub multi_step_reasoning: f64,
    pub domain_expertise: f64,
    pub synthesis_capability: f64,
    pub independence: f64,

    pub knowledge_extraction: f64,
    pub knowledge_organization: f64,
    pub knowledge_reuse_potential: f64,
    pub knowledge_quality: f64,

    pub created_knowledge_units: usize,
    pub reused_knowledge_units: usize,
    /// Agreement with prior knowledge of the domain, in `[0, 1]`.
    pub knowledge_consistency: f64,
    /// Weighted blend of seven sub-scores, in `[0, 5]`.
    pub overall_strategic_score: f64,
    #[serde(default)]
    pub degraded_steps: Vec<DegradedStep>,
}

impl StrategicMetrics {
    /// Mean task capability in `[0, 1]`.
    pub fn task_capability(&self) -> f64 {
        (self.multi_step_reasoning
            + self.domain_expertise
            + self.synthesis_capability
            + self.independence)
            / (4.0 * MAX_QUALITY)
    }

    /// Mean knowledge capability in `[0, 1]`.
    pub fn knowledge_capability(&self) -> f64 {
        (self.knowledge_extraction
            + self.knowledge_organization
            + self.knowledge_reuse_potential
            + self.knowledge_quality)
            / (4.0 * MAX_QUALITY)
    }

    /// Strategic dimension score in `[0, 1]`.
    pub fn normalized_score(&self, weights: &StrategicWeights) -> f64 {
        let score = weights.task_capability * self.task_capability()
            + weights.knowledge_capability * self.knowledge_capability();
        if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_steps.is_empty()
    }
}

/// `0.25·reasoning + 0.20·expertise + 0.20·synthesis + 0.15·independence
/// + 0.10·extraction + 0.05·organization + 0.05·reuse potential`.
pub fn overall_strategic_score(task: &TaskScores, knowledge: &KnowledgeScores) -> f64 {
    let score = task.multi_step_reasoning * 0.25
        + task.domain_expertise * 0.20
        + task.synthesis_capability * 0.20
        + task.independence * 0.15
        + knowledge.extraction * 0.10
        + knowledge.organization * 0.05
        + knowledge.reuse_potential * 0.05;
    score.clamp(0.0, MAX_QUALITY)
}

/// Task-capability sub-scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskScores {
    pub multi_step_reasoning: f64,
    pub domain_expertise: f64,
    pub synthesis_capability: f64,
    pub independence: f64,
}

impl Default for TaskScores {
    fn default() -> Self {
        Self {
            multi_step_reasoning: NEUTRAL_SCORE,
            domain_expertise: NEUTRAL_SCORE,
            synthesis_capability: NEUTRAL_SCORE,
            independence: NEUTRAL_SCORE,
        }
    }
}

/// Knowledge-capability sub-scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnowledgeScores {
    pub extraction: f64,
    pub organization: f64,
    pub reuse_potential: f64,
    pub quality: f64,
}

impl Default for KnowledgeScores {
    fn default() -> Self {
        Self {
            extraction: NEUTRAL_SCORE,
            organization: NEUTRAL_SCORE,
            reuse_potential: NEUTRAL_SCORE,
            quality: NEUTRAL_SCORE,
        }
    }
}

/// A unit proposed by the extraction call, before it gets an id.
#[derive(Debug, Clone, PartialEq)]
struct Extracted {
    ordinal: usize,
    content: String,
    tags: Vec<String>,
}

/// Scores strategic value and feeds the shared knowledge store.
pub struct StrategicEvaluator {
    generator: Arc<dyn TextGenerator>,
    store: Arc<KnowledgeStore>,
    call_timeout: Duration,
    reuse_cap: usize,
}

impl StrategicEvaluator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<KnowledgeStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            store,
            call_timeout,
            reuse_cap: DEFAULT_REUSE_CAP,
        }
    }

    pub fn with_reuse_cap(mut self, reuse_cap: usize) -> Self {
        self.reuse_cap = reuse_cap;
        self
    }

    /// Evaluate one task and persist the knowledge it produced.
    pub fn evaluate(&self, input: &StrategicInput<'_>) -> EvalResult<StrategicMetrics> {
        tracing::info!(task_id = input.task_id, domain = input.domain, "strategic evaluation started");
        let mut degraded = Vec::new();

        let task_scores = self.assess_task_capability(input).unwrap_or_else(|| {
            degraded.push(DegradedStep::TaskCapability);
            TaskScores::default()
        });

        let extracted = self.extract_knowledge(input).unwrap_or_else(|| {
            degraded.push(DegradedStep::KnowledgeExtraction);
            Vec::new()
        });

        let contents: Vec<String> = extracted.iter().map(|e| e.content.clone()).collect();
        let knowledge_scores = self
            .assess_knowledge_capability(input, &contents)
            .unwrap_or_else(|| {
                degraded.push(DegradedStep::KnowledgeCapability);
                KnowledgeScores::default()
            });

        let units: Vec<KnowledgeUnit> = extracted
            .into_iter()
            .map(|e| {
                KnowledgeUnit::new(input.task_id, e.ordinal, e.content, input.domain, e.tags)
                    .with_quality(knowledge_scores.quality)
            })
            .collect();

        let knowledge_consistency = self.store.consistency(&units, input.domain);
        let reused: Vec<String> = self
            .store
            .find_relevant(&KnowledgeQuery::domain(input.domain).with_limit(self.reuse_cap))
            .into_iter()
            .map(|u| u.id)
            .collect();

        let created_knowledge_units = units.len();
        self.store.add_all(units)?;
        self.store.record_usages(&reused)?;

        let metrics = StrategicMetrics {
            task_id: input.task_id.to_string(),
            task_title: input.task_title.to_string(),
            complexity_level: input.complexity_level,
            task_duration_minutes: input.task_duration_minutes,
            multi_step_reasoning: task_scores.multi_step_reasoning,
            domain_expertise: task_scores.domain_expertise,
            synthesis_capability: task_scores.synthesis_capability,
            independence: task_scores.independence,
            knowledge_extraction: knowledge_scores.extraction,
            knowledge_organization: knowledge_scores.organization,
            knowledge_reuse_potential: knowledge_scores.reuse_potential,
            knowledge_quality: knowledge_scores.quality,
            created_knowledge_units,
            reused_knowledge_units: reused.len(),
            knowledge_consistency,
            overall_strategic_score: overall_strategic_score(&task_scores, &knowledge_scores),
            degraded_steps: degraded,
        };

        tracing::info!(
            task_id = input.task_id,
            score = metrics.overall_strategic_score,
            created = metrics.created_knowledge_units,
            reused = metrics.reused_knowledge_units,
            degraded = metrics.degraded_steps.len(),
            "strategic evaluation finished"
        );
        Ok(metrics)
    }

    fn assess_task_capability(&self, input: &StrategicInput<'_>) -> Option<TaskScores> {
        let prompt = prompts::task_capability(
            input.task_content,
            input.agent_output,
            input.reference_output,
            input.domain,
        );
        let map = self.ask_object(DegradedStep::TaskCapability, input.task_id, &prompt)?;
        let [reasoning, expertise, synthesis, independence] = read_scores(
            &map,
            [
                "multi_step_reasoning_score",
                "domain_expertise_score",
                "synthesis_capability_score",
                "independence_score",
            ],
        )?;
        Some(TaskScores {
            multi_step_reasoning: reasoning,
            domain_expertise: expertise,
            synthesis_capability: synthesis,
            independence,
        })
    }

    fn assess_knowledge_capability(
        &self,
        input: &StrategicInput<'_>,
        extracted: &[String],
    ) -> Option<KnowledgeScores> {
        let prompt = prompts::knowledge_capability(input.task_content, input.agent_output, extracted);
        let map = self.ask_object(DegradedStep::KnowledgeCapability, input.task_id, &prompt)?;
        let [extraction, organization, reuse_potential, quality] = read_scores(
            &map,
            [
                "knowledge_extraction_score",
                "knowledge_organization_score",
                "knowledge_reuse_potential",
                "knowledge_quality_score",
            ],
        )?;
        Some(KnowledgeScores {
            extraction,
            organization,
            reuse_potential,
            quality,
        })
    }

    fn extract_knowledge(&self, input: &StrategicInput<'_>) -> Option<Vec<Extracted>> {
        let prompt = prompts::knowledge_extraction(input.task_content, input.agent_output);
        let value = self.ask(DegradedStep::KnowledgeExtraction, input.task_id, &prompt)?;
        let units = parse_extracted(value);
        if units.is_none() {
            tracing::warn!(
                task_id = input.task_id,
                step = %DegradedStep::KnowledgeExtraction,
                "response has no knowledge_units list, using defaults"
            );
        }
        units
    }

    fn ask_object(&self, step: DegradedStep, task_id: &str, prompt: &str) -> Option<Map<String, Value>> {
        let map = extract_object(&self.respond(step, task_id, prompt)?);
        if map.is_none() {
            tracing::warn!(task_id, step = %step, "no JSON object in response, using defaults");
        }
        map
    }

    fn ask(&self, step: DegradedStep, task_id: &str, prompt: &str) -> Option<Value> {
        let value = extract_json(&self.respond(step, task_id, prompt)?);
        if value.is_none() {
            tracing::warn!(task_id, step = %step, "no JSON in response, using defaults");
        }
        value
    }

    fn respond(&self, step: DegradedStep, task_id: &str, prompt: &str) -> Option<String> {
        let text = match generate_with_deadline(
            &self.generator,
            prompt,
            Some(prompts::EVALUATOR_SYSTEM),
            self.call_timeout,
        ) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(task_id, step = %step, error = %e, "generation failed, using defaults");
                return None;
            }
        };
        tracing::debug!(task_id, step = %step, response_len = text.len(), "generation response");
        Some(text)
    }
}

impl std::fmt::Debug for StrategicEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategicEvaluator")
            .field("call_timeout", &self.call_timeout)
            .field("reuse_cap", &self.reuse_cap)
            .finish_non_exhaustive()
    }
}

/// Read four sub-scores; keys that are missing or non-numeric get the neutral
/// score. `None` when none of them is usable.
fn read_scores(map: &Map<String, Value>, keys: [&str; 4]) -> Option<[f64; 4]> {
    let values = keys.map(|k| score_value(map.get(k)));
    if values.iter().all(Option::is_none) {
        return None;
    }
    Some(values.map(|v| v.unwrap_or(NEUTRAL_SCORE)))
}

fn score_value(value: Option<&Value>) -> Option<f64> {
    let v = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then(|| v.clamp(0.0, MAX_QUALITY))
}

/// Accepts `{"knowledge_units": [...]}` or a bare array. Items may be objects
/// with `content` and `tags`, or plain strings. Blank contents are dropped.
fn parse_extracted(value: Value) -> Option<Vec<Extracted>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("knowledge_units") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    let units = items
        .into_iter()
        .enumerate()
        .filter_map(|(ordinal, item)| {
            let (content, tags) = match item {
                Value::String(s) => (s, Vec::new()),
                Value::Object(map) => {
                    let content = map.get("content").and_then(Value::as_str)?.to_string();
                    let tags = match map.get("tags") {
                        Some(Value::Array(tags)) => tags
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect(),
                        Some(Value::String(tag)) => vec![tag.clone()],
                        _ => Vec::new(),
                    };
                    (content, tags)
                }
                _ => return None,
            };
            let content = content.trim();
            (!content.is_empty()).then(|| Extracted {
                ordinal,
                content: content.to_string(),
                tags,
            })
        })
        .collect();
    Some(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    /// Answers by prompt kind.
    struct Scripted {
        task: Option<&'static str>,
        extraction: Option<&'static str>,
        knowledge: Option<&'static str>,
    }

    impl TextGenerator for Scripted {
        fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
            let answer = if prompt.contains("Extract reusable knowledge units") {
                self.extraction
            } else if prompt.contains("knowledge handling") {
                self.knowledge
            } else {
                self.task
            };
            answer.map(str::to_string).ok_or(LlmError::RequestFailed {
                message: "scripted failure".into(),
            })
        }
    }

    const TASK_OK: &str = r#"{"multi_step_reasoning_score": 4, "domain_expertise_score": 5, "synthesis_capability_score": 4, "independence_score": 3}"#;
    const EXTRACT_OK: &str = r#"Here you go:
```json
{"knowledge_units": [
  {"content": "EV battery costs fell below $140/kWh in 2023", "tags": ["battery", "cost"], "type": "data"},
  {"content": "   ", "tags": []},
  {"content": "Charging infrastructure lags demand in rural areas", "tags": ["infrastructure"]}
]}
```"#;
    const KNOWLEDGE_OK: &str = r#"{"knowledge_extraction_score": 4, "knowledge_organization_score": 3, "knowledge_reuse_potential": 5, "knowledge_quality_score": 4.5}"#;

    fn input<'a>(task_id: &'a str) -> StrategicInput<'a> {
        StrategicInput {
            task_id,
            task_title: "EV market",
            task_content: "Analyse the EV market",
            agent_output: "EV adoption is accelerating...",
            domain: "technology",
            complexity_level: 4,
            reference_output: None,
            task_duration_minutes: 12.0,
        }
    }

    fn evaluator(generator: Scripted, store: Arc<KnowledgeStore>) -> StrategicEvaluator {
        StrategicEvaluator::new(Arc::new(generator), store, Duration::from_secs(5))
    }

    #[test]
    fn full_evaluation_creates_units() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let eval = evaluator(
            Scripted {
                task: Some(TASK_OK),
                extraction: Some(EXTRACT_OK),
                knowledge: Some(KNOWLEDGE_OK),
            },
            Arc::clone(&store),
        );

        let m = eval.evaluate(&input("t1")).unwrap();
        assert!(m.degraded_steps.is_empty());
        assert_eq!(m.created_knowledge_units, 2);
        assert_eq!(m.reused_knowledge_units, 0);
        assert_eq!(m.knowledge_consistency, 1.0);
        // 4·.25 + 5·.2 + 4·.2 + 3·.15 + 4·.1 + 3·.05 + 5·.05
        assert!((m.overall_strategic_score - 4.05).abs() < 1e-9);

        assert_eq!(store.len(), 2);
        let units = store.find_relevant(&KnowledgeQuery::domain("technology").with_tags(["battery"]));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].quality_score, 4.5);
        assert!(units[0].id.starts_with("t1_0_"));
        // Ordinals follow the position in the response, blanks included.
        assert!(store.ids_with_tag("infrastructure")[0].starts_with("t1_2_"));
    }

    #[test]
    fn failing_generator_degrades_to_neutral() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let eval = evaluator(
            Scripted {
                task: None,
                extraction: None,
                knowledge: Some("I cannot answer that."),
            },
            Arc::clone(&store),
        );

        let m = eval.evaluate(&input("t1")).unwrap();
        assert_eq!(
            m.degraded_steps,
            vec![
                DegradedStep::TaskCapability,
                DegradedStep::KnowledgeExtraction,
                DegradedStep::KnowledgeCapability,
            ]
        );
        assert_eq!(m.multi_step_reasoning, NEUTRAL_SCORE);
        assert_eq!(m.knowledge_quality, NEUTRAL_SCORE);
        assert_eq!(m.created_knowledge_units, 0);
        assert!((m.overall_strategic_score - 3.0).abs() < 1e-9);
        assert!((m.normalized_score(&StrategicWeights::default()) - 0.6).abs() < 1e-9);
        assert!(store.is_empty());
    }

    /// Answers correctly, but only after `delay`.
    struct Sleepy {
        delay: Duration,
    }

    impl TextGenerator for Sleepy {
        fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
            std::thread::sleep(self.delay);
            Scripted {
                task: Some(TASK_OK),
                extraction: Some(EXTRACT_OK),
                knowledge: Some(KNOWLEDGE_OK),
            }
            .generate(prompt, system)
        }
    }

    #[test]
    fn late_answers_fall_back_to_neutral_scores() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let eval = StrategicEvaluator::new(
            Arc::new(Sleepy {
                delay: Duration::from_millis(300),
            }),
            Arc::clone(&store),
            Duration::from_millis(20),
        );

        let m = eval.evaluate(&input("t1")).unwrap();
        assert_eq!(
            m.degraded_steps,
            vec![
                DegradedStep::TaskCapability,
                DegradedStep::KnowledgeExtraction,
                DegradedStep::KnowledgeCapability,
            ]
        );
        assert_eq!(m.domain_expertise, NEUTRAL_SCORE);
        assert_eq!(m.knowledge_reuse_potential, NEUTRAL_SCORE);
        assert_eq!(m.created_knowledge_units, 0);
        assert!((m.overall_strategic_score - NEUTRAL_SCORE).abs() < 1e-9);
        assert!(store.is_empty());
    }

    #[test]
    fn second_task_reuses_prior_knowledge() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let eval = evaluator(
            Scripted {
                task: Some(TASK_OK),
                extraction: Some(EXTRACT_OK),
                knowledge: Some(KNOWLEDGE_OK),
            },
            Arc::clone(&store),
        );

        eval.evaluate(&input("t1")).unwrap();
        let m = eval.evaluate(&input("t2")).unwrap();
        assert_eq!(m.reused_knowledge_units, 2);
        // Same content as the prior units.
        assert!((m.knowledge_consistency - 1.0).abs() < 1e-12);
        assert_eq!(store.len(), 4);
        assert_eq!(store.stats().total_usage, 2);
    }

    #[test]
    fn reuse_is_capped() {
        let store = Arc::new(KnowledgeStore::in_memory());
        for i in 0..8 {
            store
                .add(KnowledgeUnit::new("seed", i, format!("fact {i}"), "technology", Vec::new()))
                .unwrap();
        }
        let eval = evaluator(
            Scripted {
                task: Some(TASK_OK),
                extraction: Some(r#"{"knowledge_units": []}"#),
                knowledge: Some(KNOWLEDGE_OK),
            },
            Arc::clone(&store),
        )
        .with_reuse_cap(3);

        let m = eval.evaluate(&input("t1")).unwrap();
        assert_eq!(m.reused_knowledge_units, 3);
        assert_eq!(m.created_knowledge_units, 0);
        assert!(m.degraded_steps.is_empty());
    }

    #[test]
    fn partial_scores_fill_neutral() {
        let map: Map<String, Value> =
            serde_json::from_str(r#"{"multi_step_reasoning_score": "4.5", "domain_expertise_score": 9}"#).unwrap();
        let scores = read_scores(
            &map,
            [
                "multi_step_reasoning_score",
                "domain_expertise_score",
                "synthesis_capability_score",
                "independence_score",
            ],
        )
        .unwrap();
        assert_eq!(scores, [4.5, 5.0, NEUTRAL_SCORE, NEUTRAL_SCORE]);

        let empty = Map::new();
        assert!(read_scores(&empty, ["a", "b", "c", "d"]).is_none());
    }

    #[test]
    fn bare_array_extraction_is_accepted() {
        let units = parse_extracted(serde_json::json!(["plain fact", {"content": "tagged", "tags": "one"}])).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].tags, vec!["one".to_string()]);
        assert!(parse_extracted(serde_json::json!({"other": []})).is_none());
    }

    #[test]
    fn overall_score_weights() {
        let task = TaskScores {
            multi_step_reasoning: 5.0,
            domain_expertise: 5.0,
            synthesis_capability: 5.0,
            independence: 5.0,
        };
        let knowledge = KnowledgeScores {
            extraction: 5.0,
            organization: 5.0,
            reuse_potential: 5.0,
            quality: 0.0,
        };
        assert!((overall_strategic_score(&task, &knowledge) - 5.0).abs() < 1e-9);
    }
}
