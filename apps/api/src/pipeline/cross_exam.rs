//! Cross-examination stage: personalized probing questions, then a critical
//! analysis of the user's answers.
//!
//! Question generation is the one quality-gated stage in the pipeline: if
//! fewer than `MIN_QUESTIONS` valid questions survive trimming, the whole
//! request fails rather than returning a partial list. Every other stage
//! degrades locally.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::llm::normalize::{coerce_string_list, normalize};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::prompts::{
    render, CROSS_EXAM_ANALYSIS_TEMPLATE, CROSS_EXAM_FOLLOWUPS_TEMPLATE,
};
use crate::pipeline::{prompts::template_for, Stage};
use crate::profile::models::ProfileDoc;

/// Minimum question count for a valid round; fewer is a hard failure.
pub const MIN_QUESTIONS: usize = 5;
/// Questions beyond this are dropped.
pub const MAX_QUESTIONS: usize = 6;
/// Follow-up questions beyond this are dropped.
pub const MAX_FOLLOWUP_QUESTIONS: usize = 3;
/// No follow-ups are generated past this many answer rounds.
pub const MAX_FOLLOWUP_ROUNDS: u64 = 2;

fn profile_slots(profile: &ProfileDoc) -> Vec<(&'static str, Option<String>)> {
    let s = |path: &str| profile.str_at(path).map(str::to_string);
    vec![
        ("full_name", s("personal.fullName")),
        ("strengths", s("strengthsAndWeaknesses.strengths")),
        ("struggles", s("strengthsAndWeaknesses.struggleWith")),
        ("preferred_role", s("interests.preferredRole")),
        ("risk_taking", s("learningRoadmap.riskTaking")),
        ("field_of_study", s("personal.fieldOfStudy")),
        ("location", s("personal.city")),
        ("mobility", s("personal.mobility")),
        ("financial_status", s("personal.financialStatus")),
        ("leadership", s("optionalFields.leadershipRole")),
    ]
}

/// Generates one round of cross-examination questions.
///
/// Provider failures propagate (this stage does not degrade), and a round
/// with fewer than `MIN_QUESTIONS` usable questions is rejected with
/// `AppError::QualityGate`.
pub async fn generate_questions(
    ctx: &PipelineContext,
    profile: &ProfileDoc,
) -> Result<Vec<String>, AppError> {
    let stage = Stage::CrossExam;
    let prompt = render(template_for(stage), &profile_slots(profile));

    let raw = ctx.call_stage(stage, &prompt).await?;
    let parsed = normalize(&raw, json!([]));

    let mut questions: Vec<String> = coerce_string_list(Some(&parsed))
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    questions.truncate(MAX_QUESTIONS);

    if questions.len() < MIN_QUESTIONS {
        warn!(
            produced = questions.len(),
            "Cross-exam round rejected: too few questions"
        );
        return Err(AppError::QualityGate(format!(
            "Model produced {} questions; at least {MIN_QUESTIONS} are required",
            questions.len()
        )));
    }

    info!(count = questions.len(), "Cross-exam questions generated");
    Ok(questions)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossExamSummary {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub skill_gaps: Vec<String>,
    pub suggestions: Vec<String>,
    pub next_steps: Vec<String>,
    pub friendly_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrossExamSummary {
    fn from_model_output(value: &Value) -> Self {
        let string_of = |key: &str| match value.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            strengths: coerce_string_list(value.get("strengths")),
            weaknesses: coerce_string_list(value.get("weaknesses")),
            skill_gaps: coerce_string_list(value.get("skill_gaps")),
            suggestions: coerce_string_list(value.get("suggestions")),
            next_steps: coerce_string_list(value.get("next_steps")),
            friendly_summary: string_of("friendly_summary"),
            error: None,
        }
    }

    fn degraded(error: String) -> Self {
        Self {
            friendly_summary: "Analysis unavailable for this round.".to_string(),
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Analyzes the user's answers against the asked questions. Degrades
/// locally like the other analysis stages.
pub async fn analyze_answers(
    ctx: &PipelineContext,
    profile: &ProfileDoc,
    questions: &[String],
    answers: &[String],
) -> CrossExamSummary {
    let mut slots = profile_slots(profile);
    slots.retain(|(key, _)| {
        matches!(
            *key,
            "full_name" | "strengths" | "struggles" | "preferred_role" | "risk_taking" | "leadership"
        )
    });
    slots.push(("questions", Some(json!(questions).to_string())));
    slots.push(("answers", Some(json!(answers).to_string())));

    let prompt = render(CROSS_EXAM_ANALYSIS_TEMPLATE, &slots);

    match ctx.call_stage(Stage::CrossExam, &prompt).await {
        Ok(raw) => {
            let fallback = json!({
                "friendly_summary": "Analysis failed or returned invalid JSON."
            });
            CrossExamSummary::from_model_output(&normalize(&raw, fallback))
        }
        Err(e) => {
            warn!("Cross-exam analysis degraded: {e}");
            CrossExamSummary::degraded(e.to_string())
        }
    }
}

/// Pulls question strings out of the follow-up payload, which arrives
/// either as `[{"question": ...}, ...]` or as a plain string array.
fn followup_questions(parsed: &Value) -> Vec<String> {
    let Some(items) = parsed.as_array() else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("question").and_then(Value::as_str).map(String::from),
            _ => None,
        })
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Generates one round of follow-up questions for answers that need
/// clarification or expansion. Degrades to an empty round on provider
/// failure or unusable output; follow-ups are never quality-gated.
pub async fn generate_followups(
    ctx: &PipelineContext,
    profile: &ProfileDoc,
    questions: &[String],
    answers: &[String],
) -> Vec<String> {
    let mut slots = profile_slots(profile);
    slots.retain(|(key, _)| matches!(*key, "full_name" | "preferred_role" | "risk_taking"));
    slots.push(("questions", Some(json!(questions).to_string())));
    slots.push(("answers", Some(json!(answers).to_string())));

    let prompt = render(CROSS_EXAM_FOLLOWUPS_TEMPLATE, &slots);

    match ctx.call_stage(Stage::CrossExam, &prompt).await {
        Ok(raw) => {
            let mut followups = followup_questions(&normalize(&raw, json!([])));
            followups.truncate(MAX_FOLLOWUP_QUESTIONS);
            info!(count = followups.len(), "Cross-exam follow-ups generated");
            followups
        }
        Err(e) => {
            warn!("Cross-exam follow-up round degraded: {e}");
            vec![]
        }
    }
}
