//! Defensive extraction of JSON payloads from free-form model output.
//!
//! Models wrap their JSON in prose, Markdown fences, or emit something that is
//! only almost JSON. [`extract_json`] has one contract: return the first
//! parseable object or array it can find, or `None`. It never panics.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static RE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap()
});

/// Upper bound on candidate start positions tried by the brace scanner.
const MAX_CANDIDATES: usize = 64;

/// Extract a JSON object or array embedded in `text`.
///
/// Tried in order: the whole text, each fenced code block, then every
/// balanced `{...}` / `[...]` span starting from the left.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(v) = parse_structured(trimmed) {
        return Some(v);
    }

    for cap in RE_FENCE.captures_iter(trimmed) {
        if let Some(body) = cap.get(1) {
            let body = body.as_str().trim();
            if let Some(v) = parse_structured(body) {
                return Some(v);
            }
            if let Some(v) = scan_balanced(body) {
                return Some(v);
            }
        }
    }

    scan_balanced(trimmed)
}

/// Extract a JSON object, ignoring arrays.
pub fn extract_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    match extract_json(text)? {
        Value::Object(map) => Some(map),
        // A lone object wrapped in an array is still usable.
        Value::Array(items) => items.into_iter().find_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }),
        _ => None,
    }
}

fn parse_structured(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}

fn scan_balanced(text: &str) -> Option<Value> {
    let starts = text
        .char_indices()
        .filter(|&(_, c)| c == '{' || c == '[')
        .map(|(i, _)| i)
        .take(MAX_CANDIDATES);

    for start in starts {
        if let Some(end) = balanced_end(&text[start..]) {
            if let Some(v) = parse_structured(&text[start..start + end]) {
                return Some(v);
            }
        }
    }
    None
}

/// Byte length of the balanced bracket span at the start of `s`, honouring
/// string literals and escapes.
fn balanced_end(s: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_object() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn object_inside_prose() {
        let text = r#"Sure! Here is my assessment: {"score": 4.5, "note": "uses {braces}"} Hope it helps."#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["score"], 4.5);
        assert_eq!(v["note"], "uses {braces}");
    }

    #[test]
    fn fenced_block() {
        let text = "Result:\n```json\n{\"knowledge_units\": [{\"content\": \"x\"}]}\n```\nDone.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["knowledge_units"][0]["content"], "x");
    }

    #[test]
    fn nested_objects_are_kept_whole() {
        let text = r#"prefix {"outer": {"inner": [1, 2, {"deep": true}]}} suffix"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["outer"]["inner"][2]["deep"], true);
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(extract_json(r#"{"score": 4.5,, "x": }"#).is_none());
        assert!(extract_json("no structure at all").is_none());
        assert!(extract_json("").is_none());
        assert!(extract_json("}}}{{{").is_none());
    }

    #[test]
    fn skips_broken_candidate_and_finds_next() {
        let text = r#"{broken} then {"ok": 1}"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["ok"], 1);
    }

    #[test]
    fn scalars_are_not_payloads() {
        assert!(extract_json("42").is_none());
        assert!(extract_json("\"just a string\"").is_none());
    }

    #[test]
    fn object_from_single_element_array() {
        let map = extract_object(r#"[{"a": 2}]"#).unwrap();
        assert_eq!(map["a"], 2);
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let text = r#"x {"quote": "she said \"}\" loudly"} y"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["quote"], "she said \"}\" loudly");
    }
}
