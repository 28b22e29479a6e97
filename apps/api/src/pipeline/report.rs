//! Final-report shape normalization.
//!
//! The gap-analysis model output is coerced into a stable `FinalAnalysis`
//! regardless of how sloppy the completion was: required list sections are
//! never empty (placeholder sentinels fill in), `top_careers` always holds
//! exactly three entries, and the category diversity policy is enforced
//! deterministically by relabeling instead of re-querying the model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::normalize::{coerce_string_list, require_non_empty};

pub const NO_DATA: &str = "No data available";
const NO_MERITS: &str = "No merits info available";
const NO_DEMERITS: &str = "No demerits info available";
const NO_TRENDS: &str = "No market trends info available";
const UNKNOWN_CAREER: &str = "Unknown Career";
const DEFAULT_SUMMARY: &str = "Here is your career summary based on your profile.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CareerCategory {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "NON_OBVIOUS")]
    NonObvious,
    #[serde(rename = "HIGH_RISK")]
    HighRisk,
}

impl CareerCategory {
    /// Position-based label used when the model fails the diversity policy.
    fn for_index(i: usize) -> Self {
        match i {
            0 => CareerCategory::Safe,
            1 => CareerCategory::NonObvious,
            _ => CareerCategory::HighRisk,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "SAFE" => Some(CareerCategory::Safe),
            "NON_OBVIOUS" => Some(CareerCategory::NonObvious),
            "HIGH_RISK" | "HIGH_RISK_HIGH_EFFORT" => Some(CareerCategory::HighRisk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareerOption {
    pub name: String,
    pub category: CareerCategory,
    pub merits: Vec<String>,
    pub demerits: Vec<String>,
    pub trends: Vec<String>,
}

impl CareerOption {
    fn placeholder(index: usize) -> Self {
        Self {
            name: format!("Career {}", index + 1),
            category: CareerCategory::for_index(index),
            merits: vec![NO_MERITS.to_string()],
            demerits: vec![NO_DEMERITS.to_string()],
            trends: vec![NO_TRENDS.to_string()],
        }
    }
}

/// The consolidated report persisted under `finalAnalysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnalysis {
    pub friendly_summary: String,
    pub top_careers: Vec<CareerOption>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub skill_gaps: Vec<String>,
    pub suggestions: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_conflicts: Vec<String>,
}

/// Coerces arbitrary gap-analysis output into a well-formed `FinalAnalysis`.
pub fn normalize_final_report(value: &Value) -> FinalAnalysis {
    let required_list = |key: &str| require_non_empty(coerce_string_list(value.get(key)), NO_DATA);

    let friendly_summary = match value.get("friendly_summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Null) | None => DEFAULT_SUMMARY.to_string(),
        Some(other) if !other.is_string() => other.to_string(),
        _ => DEFAULT_SUMMARY.to_string(),
    };

    FinalAnalysis {
        friendly_summary,
        top_careers: normalize_careers(value.get("top_careers")),
        strengths: required_list("strengths"),
        weaknesses: required_list("weaknesses"),
        skill_gaps: required_list("skill_gaps"),
        suggestions: required_list("suggestions"),
        next_steps: required_list("next_steps"),
        key_conflicts: coerce_string_list(value.get("key_conflicts")),
    }
}

/// Exactly three careers, each with non-empty merits/demerits/trends, with
/// category diversity enforced (one SAFE, one NON_OBVIOUS, one HIGH_RISK).
fn normalize_careers(value: Option<&Value>) -> Vec<CareerOption> {
    let raw: Vec<Value> = match value {
        Some(Value::Array(items)) => items.clone(),
        _ => vec![],
    };

    let mut careers: Vec<CareerOption> = raw
        .iter()
        .take(3)
        .map(|entry| {
            let name = match entry.get("name") {
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                _ => UNKNOWN_CAREER.to_string(),
            };
            let category = entry
                .get("category")
                .and_then(Value::as_str)
                .and_then(CareerCategory::parse)
                .unwrap_or(CareerCategory::Safe);
            CareerOption {
                name,
                category,
                merits: require_non_empty(coerce_string_list(entry.get("merits")), NO_MERITS),
                demerits: require_non_empty(coerce_string_list(entry.get("demerits")), NO_DEMERITS),
                trends: require_non_empty(coerce_string_list(entry.get("trends")), NO_TRENDS),
            }
        })
        .collect();

    while careers.len() < 3 {
        careers.push(CareerOption::placeholder(careers.len()));
    }

    enforce_category_diversity(&mut careers);
    careers
}

/// Deterministic relabeling: when the three entries do not exhibit all three
/// categories, positions win (0 → SAFE, 1 → NON_OBVIOUS, 2 → HIGH_RISK).
fn enforce_category_diversity(careers: &mut [CareerOption]) {
    let distinct: std::collections::HashSet<CareerCategory> =
        careers.iter().map(|c| c.category).collect();

    if distinct.len() < 3 {
        for (i, career) in careers.iter_mut().enumerate() {
            career.category = CareerCategory::for_index(i);
        }
    }
}
