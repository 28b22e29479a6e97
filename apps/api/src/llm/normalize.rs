//! Response Normalizer: converts a text blob that is *supposed* to be JSON
//! into a well-formed `serde_json::Value`, tolerating the usual LLM
//! formatting noise (markdown fences, chatty prose around the payload).
//!
//! `normalize` is total: for any input and any fallback it returns either a
//! successful parse matching the fallback's shape family, or the fallback
//! itself. It never errors, so a malformed completion degrades gracefully
//! instead of aborting a pipeline stage.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid fence regex"))
}

fn object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid object regex"))
}

fn array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("valid array regex"))
}

/// Strips a fenced code block wrapper (with optional `json` tag) if present.
/// Anything outside the first fence pair is discarded.
pub fn strip_fences(text: &str) -> String {
    let text = text.trim();
    if text.starts_with("```") {
        if let Some(captures) = fence_re().captures(text) {
            return captures[1].trim().to_string();
        }
    }
    text.to_string()
}

/// True when `value` belongs to the same shape family as `fallback`
/// (object vs array; any other fallback shape accepts any parse).
fn same_family(value: &Value, fallback: &Value) -> bool {
    match fallback {
        Value::Object(_) => value.is_object(),
        Value::Array(_) => value.is_array(),
        _ => true,
    }
}

/// Parses LLM output into JSON, falling back gracefully.
///
/// 1. Strip a fenced code block if present.
/// 2. Direct parse of the cleaned text.
/// 3. Greedy regex extraction of the first `{...}` (or `[...]` when the
///    fallback is an array) span, then parse the span.
/// 4. Return the fallback unchanged.
pub fn normalize(text: &str, fallback: Value) -> Value {
    if text.trim().is_empty() {
        return fallback;
    }

    let cleaned = strip_fences(text);

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        if same_family(&value, &fallback) {
            return value;
        }
    }

    let span_re = if fallback.is_array() {
        array_re()
    } else {
        object_re()
    };

    if let Some(m) = span_re.find(&cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            if same_family(&value, &fallback) {
                return value;
            }
        }
    }

    fallback
}

/// Coerces an arbitrary model-returned value into a list of strings:
/// list → element strings, map → stringified values, scalar → singleton,
/// null/absent → empty.
pub fn coerce_string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(items)) => items.iter().filter_map(value_to_string).collect(),
        Some(Value::Object(map)) => map.values().filter_map(value_to_string).collect(),
        Some(other) => value_to_string(other).into_iter().collect(),
    }
}

/// Replaces an empty list with a single placeholder entry so required
/// report sections are never blank.
pub fn require_non_empty(list: Vec<String>, placeholder: &str) -> Vec<String> {
    if list.is_empty() {
        vec![placeholder.to_string()]
    } else {
        list
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        other => Some(other.to_string()),
    }
}
