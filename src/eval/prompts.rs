//! Prompt templates for the three text-generation calls of strategic evaluation.

/// System prompt shared by every evaluation call.
pub const EVALUATOR_SYSTEM: &str = "You are a rigorous evaluator of AI research agents. \
Answer only with the JSON object requested, without commentary.";

/// Maximum number of extracted units listed in the knowledge-capability prompt.
pub const MAX_LISTED_UNITS: usize = 10;

/// Ask for the four task-capability sub-scores.
pub fn task_capability(task: &str, output: &str, reference: Option<&str>, domain: &str) -> String {
    let reference = reference
        .filter(|r| !r.trim().is_empty())
        .map(|r| format!("\nReference output:\n{r}\n"))
        .unwrap_or_default();

    format!(
        r#"Rate the AI agent's performance on the following {domain} task on a 1-5 scale (5 is best).

Task:
{task}

Agent output:
{output}
{reference}
Score these four dimensions:

1. Multi-step reasoning: is the reasoning chain clear and sound, and does it handle layered cause and effect?
2. Domain expertise: is specialist knowledge applied accurately and in sufficient depth?
3. Synthesis capability: are multiple sources integrated into core insights?
4. Independence: could the task be completed without human intervention, and is uncertainty handled?

Respond in JSON:
{{
    "multi_step_reasoning_score": <1-5>,
    "domain_expertise_score": <1-5>,
    "synthesis_capability_score": <1-5>,
    "independence_score": <1-5>,
    "overall_reasoning": "<short justification>"
}}"#
    )
}

/// Ask for reusable knowledge units contained in the output.
pub fn knowledge_extraction(task: &str, output: &str) -> String {
    format!(
        r#"Extract reusable knowledge units from the AI agent output below. Each unit must be a self-contained, valuable piece of information that could be reused in related tasks.

Task:
{task}

Agent output:
{output}

For each unit give:
1. the knowledge content
2. applicable tags (e.g. market analysis, technology trend, industry data)
3. the knowledge type (e.g. fact, method, opinion, data)

Respond in JSON:
{{
    "knowledge_units": [
        {{
            "content": "<knowledge content>",
            "tags": ["<tag>", "<tag>"],
            "type": "<knowledge type>"
        }}
    ]
}}"#
    )
}

/// Ask for the four knowledge-capability sub-scores.
pub fn knowledge_capability(task: &str, output: &str, extracted: &[String]) -> String {
    let listed = if extracted.is_empty() {
        "(none)".to_string()
    } else {
        extracted
            .iter()
            .take(MAX_LISTED_UNITS)
            .enumerate()
            .map(|(i, k)| format!("{}. {k}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"Rate the AI agent's knowledge handling on a 1-5 scale (5 is best).

Task:
{task}

Agent output:
{output}

Extracted knowledge:
{listed}

Score these four dimensions:

1. Knowledge extraction: are the key, accurate, valuable facts captured at a sensible granularity?
2. Knowledge organization: is the knowledge clearly structured, related and tagged?
3. Knowledge reuse potential: is the knowledge general enough to transfer to other tasks?
4. Knowledge quality: is the knowledge accurate, complete and insightful?

Respond in JSON:
{{
    "knowledge_extraction_score": <1-5>,
    "knowledge_organization_score": <1-5>,
    "knowledge_reuse_potential": <1-5>,
    "knowledge_quality_score": <1-5>,
    "knowledge_reasoning": "<short justification>"
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_optional() {
        let with = task_capability("t", "o", Some("ref text"), "finance");
        assert!(with.contains("Reference output:\nref text"));
        let without = task_capability("t", "o", Some("  "), "finance");
        assert!(!without.contains("Reference output"));
    }

    #[test]
    fn capability_prompt_lists_at_most_ten_units() {
        let units: Vec<String> = (0..12).map(|i| format!("unit {i}")).collect();
        let prompt = knowledge_capability("t", "o", &units);
        assert!(prompt.contains("10. unit 9"));
        assert!(!prompt.contains("unit 10"));
    }

    #[test]
    fn extraction_prompt_embeds_inputs() {
        let prompt = knowledge_extraction("analyse EV market", "EVs grew 30%");
        assert!(prompt.contains("analyse EV market"));
        assert!(prompt.contains("EVs grew 30%"));
        assert!(prompt.contains("\"knowledge_units\""));
    }
}
