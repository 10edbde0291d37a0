//! Output quality from externally produced rubric (RACE) and citation (FACT) scores.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::QualityWeights;
use crate::error::{BatchError, BatchResult};

/// RACE scores are on a 0–5 rubric.
pub const RACE_SCALE: f64 = 5.0;

/// Precomputed quality inputs for one task. Absent fields count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityInput {
    /// Rubric score in `[0, 5]`.
    pub race_score: f64,
    /// Fraction of verified citations in `[0, 1]`.
    pub citation_accuracy: f64,
    pub effective_citations: u64,
}

impl QualityInput {
    /// Weighted quality score in `[0, 1]`.
    pub fn score(&self, weights: &QualityWeights) -> f64 {
        weights.race_score * unit(self.race_score / RACE_SCALE)
            + weights.fact_score * unit(self.citation_accuracy)
    }
}

fn unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

/// Quality inputs keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct QualityTable {
    entries: BTreeMap<String, QualityInput>,
}

impl QualityTable {
    /// Merge RACE and FACT result files into one table.
    ///
    /// Each file is a JSON array or JSONL of records keyed by `task_id` (or
    /// `id`). RACE records carry `race_score` (or `overall_score`); FACT
    /// records carry `citation_accuracy` and `effective_citations`.
    pub fn load(race: Option<&Path>, fact: Option<&Path>) -> BatchResult<Self> {
        let mut table = Self::default();

        if let Some(path) = race {
            for (id, record) in read_records(path)? {
                let score = number(&record, "race_score").or_else(|| number(&record, "overall_score"));
                if let Some(score) = score {
                    table.entries.entry(id).or_default().race_score = score;
                }
            }
        }

        if let Some(path) = fact {
            for (id, record) in read_records(path)? {
                let entry = table.entries.entry(id).or_default();
                if let Some(acc) = number(&record, "citation_accuracy") {
                    entry.citation_accuracy = acc;
                }
                if let Some(n) = record.get("effective_citations").and_then(Value::as_u64) {
                    entry.effective_citations = n;
                }
            }
        }

        tracing::info!(tasks = table.len(), "loaded quality results");
        Ok(table)
    }

    pub fn insert(&mut self, task_id: impl Into<String>, input: QualityInput) {
        self.entries.insert(task_id.into(), input);
    }

    pub fn get(&self, task_id: &str) -> Option<&QualityInput> {
        self.entries.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn number(record: &Map<String, Value>, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_records(path: &Path) -> BatchResult<Vec<(String, Map<String, Value>)>> {
    let err = |message: String| BatchError::QualityInput {
        path: path.display().to_string(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
    let values = parse_records(&text).map_err(err)?;

    let mut records = Vec::with_capacity(values.len());
    for value in values {
        let Value::Object(map) = value else { continue };
        let id = map
            .get("task_id")
            .or_else(|| map.get("id"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        match id {
            Some(id) => records.push((id, map)),
            None => tracing::debug!(path = %path.display(), "skipping quality record without task id"),
        }
    }
    Ok(records)
}

fn parse_records(text: &str) -> Result<Vec<Value>, String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).map_err(|e| format!("line {}: {e}", i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_quality_scores_zero() {
        assert_eq!(QualityInput::default().score(&QualityWeights::default()), 0.0);
    }

    #[test]
    fn perfect_quality_scores_one() {
        let q = QualityInput {
            race_score: 5.0,
            citation_accuracy: 1.0,
            effective_citations: 12,
        };
        assert!((q.score(&QualityWeights::default()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let q = QualityInput {
            race_score: 9.0,
            citation_accuracy: -0.5,
            effective_citations: 0,
        };
        assert!((q.score(&QualityWeights::default()) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn load_merges_race_array_and_fact_jsonl() {
        let dir = tempfile::TempDir::new().unwrap();
        let race = dir.path().join("race.json");
        let fact = dir.path().join("fact.jsonl");
        std::fs::write(
            &race,
            r#"[{"task_id": "a", "race_score": 4.0}, {"id": "b", "overall_score": "2.5"}, {"race_score": 1}]"#,
        )
        .unwrap();
        std::fs::write(
            &fact,
            "{\"task_id\": \"a\", \"citation_accuracy\": 0.8, \"effective_citations\": 7}\n\n{\"task_id\": \"c\", \"citation_accuracy\": 0.5}\n",
        )
        .unwrap();

        let table = QualityTable::load(Some(&race), Some(&fact)).unwrap();
        assert_eq!(table.len(), 3);
        let a = table.get("a").unwrap();
        assert_eq!(a.race_score, 4.0);
        assert_eq!(a.citation_accuracy, 0.8);
        assert_eq!(a.effective_citations, 7);
        assert_eq!(table.get("b").unwrap().race_score, 2.5);
        assert_eq!(table.get("c").unwrap().race_score, 0.0);
    }

    #[test]
    fn malformed_line_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let fact = dir.path().join("fact.jsonl");
        std::fs::write(&fact, "{\"task_id\": \"a\"}\nnot json\n").unwrap();
        let err = QualityTable::load(None, Some(&fact)).unwrap_err();
        assert!(matches!(err, BatchError::QualityInput { ref message, .. } if message.starts_with("line 2")));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = QualityTable::load(Some(Path::new("/nonexistent/race.json")), None).unwrap_err();
        assert!(matches!(err, BatchError::QualityInput { .. }));
    }
}
