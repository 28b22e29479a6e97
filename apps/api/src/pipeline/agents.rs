//! Per-stage analysis agents.
//!
//! Every agent follows the same contract: build a prompt from the profile
//! sections it consumes, call the stage's provider through the per-run
//! context, normalize the completion into a typed summary, and NEVER fail
//! the run. A provider failure degrades into a summary carrying only an
//! `error` marker, which downstream stages treat as absent data.
//!
//! All shape coercion lives here and in `llm::normalize`; nothing else in
//! the codebase touches raw model output.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::llm::normalize::{coerce_string_list, normalize};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::prompts::{render, template_for};
use crate::pipeline::Stage;

/// Serializes a profile section for prompt interpolation. Empty sections
/// become `None` so the template line is omitted entirely.
pub fn slot_json(value: &Value) -> Option<String> {
    if crate::profile::store::is_empty_value(value) {
        None
    } else {
        Some(value.to_string())
    }
}

/// A string field from model output: strings pass through, other scalars
/// and structures are stringified, null/absent become empty.
fn string_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

fn list_field(value: &Value, key: &str) -> Vec<String> {
    coerce_string_list(value.get(key))
}

// ────────────────────────────────────────────────────────────────────────────
// SocioEconomic
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocioEconomicSummary {
    pub location_constraints: Vec<String>,
    pub financial_analysis: String,
    pub risk_capacity: String,
    pub restricted_career_types: Vec<String>,
    pub allowed_career_types: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SocioEconomicSummary {
    fn from_model_output(value: &Value) -> Self {
        Self {
            location_constraints: list_field(value, "location_constraints"),
            financial_analysis: string_field(value, "financial_analysis"),
            risk_capacity: string_field(value, "risk_capacity"),
            restricted_career_types: list_field(value, "restricted_career_types"),
            allowed_career_types: list_field(value, "allowed_career_types"),
            recommendations: list_field(value, "recommendations"),
            error: None,
        }
    }

    fn degraded(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

pub async fn run_socio_economic(
    ctx: &PipelineContext,
    personal_info: &Value,
    optional_fields: &Value,
) -> SocioEconomicSummary {
    let stage = Stage::SocioEconomic;
    let prompt = render(
        template_for(stage),
        &[
            ("personal_info", slot_json(personal_info)),
            ("optional_fields", slot_json(optional_fields)),
        ],
    );

    match ctx.call_stage(stage, &prompt).await {
        Ok(raw) => SocioEconomicSummary::from_model_output(&normalize(&raw, json!({}))),
        Err(e) => {
            warn!(stage = stage.partial_key(), "Stage degraded: {e}");
            SocioEconomicSummary::degraded(e.to_string())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LearningRoadmap
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningSummary {
    pub learning_gaps: Vec<String>,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LearningSummary {
    fn from_model_output(value: &Value) -> Self {
        Self {
            learning_gaps: list_field(value, "learning_gaps"),
            recommendations: list_field(value, "recommendations"),
            next_steps: list_field(value, "next_steps"),
            error: None,
        }
    }

    fn degraded(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

pub async fn run_learning(
    ctx: &PipelineContext,
    learning_data: &Value,
    strengths_and_weaknesses: &Value,
    user_name: Option<&str>,
) -> LearningSummary {
    let stage = Stage::LearningRoadmap;
    let prompt = render(
        template_for(stage),
        &[
            (
                "user_name",
                Some(user_name.unwrap_or("the user").to_string()),
            ),
            ("learning_data", slot_json(learning_data)),
            (
                "strengths_and_weaknesses",
                slot_json(strengths_and_weaknesses),
            ),
        ],
    );

    match ctx.call_stage(stage, &prompt).await {
        Ok(raw) => LearningSummary::from_model_output(&normalize(&raw, json!({}))),
        Err(e) => {
            warn!(stage = stage.partial_key(), "Stage degraded: {e}");
            LearningSummary::degraded(e.to_string())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ResumeAnalysis
// ────────────────────────────────────────────────────────────────────────────

/// Max resume characters sent to the model.
const RESUME_PROMPT_CHARS: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeSummary {
    pub skills: Vec<String>,
    pub projects: Vec<String>,
    pub gaps: Vec<String>,
    pub role_alignment: String,
    pub resume_risk_factors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResumeSummary {
    fn from_model_output(value: &Value) -> Self {
        Self {
            skills: list_field(value, "skills"),
            projects: list_field(value, "projects"),
            gaps: list_field(value, "gaps"),
            role_alignment: string_field(value, "role_alignment"),
            resume_risk_factors: list_field(value, "resume_risk_factors"),
            error: None,
        }
    }

    fn degraded(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

pub async fn run_resume(
    ctx: &PipelineContext,
    resume_text: &str,
    strengths_and_weaknesses: &Value,
    preferred_role: Option<&str>,
) -> ResumeSummary {
    let stage = Stage::ResumeAnalysis;
    let truncated: String = resume_text.chars().take(RESUME_PROMPT_CHARS).collect();

    let prompt = render(
        template_for(stage),
        &[
            (
                "strengths_and_weaknesses",
                slot_json(strengths_and_weaknesses),
            ),
            ("preferred_role", preferred_role.map(str::to_string)),
            ("resume_text", Some(truncated)),
        ],
    );

    match ctx.call_stage(stage, &prompt).await {
        Ok(raw) => ResumeSummary::from_model_output(&normalize(&raw, json!({}))),
        Err(e) => {
            warn!(stage = stage.partial_key(), "Stage degraded: {e}");
            ResumeSummary::degraded(e.to_string())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AptitudeInterest
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AptitudeSummary {
    pub suggested_domains: Vec<String>,
    pub conflicts: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AptitudeSummary {
    fn from_model_output(value: &Value) -> Self {
        Self {
            suggested_domains: list_field(value, "suggested_domains"),
            conflicts: list_field(value, "conflicts"),
            recommendations: list_field(value, "recommendations"),
            error: None,
        }
    }

    fn degraded(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

pub async fn run_aptitude(
    ctx: &PipelineContext,
    tests: &Value,
    interests: &Value,
    personal_info: &Value,
) -> AptitudeSummary {
    let stage = Stage::AptitudeInterest;
    let prompt = render(
        template_for(stage),
        &[
            ("personal_info", slot_json(personal_info)),
            ("tests", slot_json(tests)),
            ("interests", slot_json(interests)),
        ],
    );

    match ctx.call_stage(stage, &prompt).await {
        Ok(raw) => AptitudeSummary::from_model_output(&normalize(&raw, json!({}))),
        Err(e) => {
            warn!(stage = stage.partial_key(), "Stage degraded: {e}");
            AptitudeSummary::degraded(e.to_string())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recommendation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub pathways: Vec<String>,
    pub roadmaps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecommendationSummary {
    fn from_model_output(value: &Value) -> Self {
        Self {
            pathways: list_field(value, "pathways"),
            roadmaps: list_field(value, "roadmaps"),
            error: None,
        }
    }

    fn degraded(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

pub async fn run_recommendation(
    ctx: &PipelineContext,
    analysis: &Value,
) -> RecommendationSummary {
    let stage = Stage::Recommendation;
    let prompt = render(
        template_for(stage),
        &[("analysis", slot_json(analysis))],
    );

    match ctx.call_stage(stage, &prompt).await {
        Ok(raw) => RecommendationSummary::from_model_output(&normalize(&raw, json!({}))),
        Err(e) => {
            warn!(stage = stage.partial_key(), "Stage degraded: {e}");
            RecommendationSummary::degraded(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::llm::backend::TextBackend;
    use crate::llm::{CallOptions, LlmRouter, Provider, ProviderError};

    struct ScriptedBackend(String);

    #[async_trait]
    impl TextBackend for ScriptedBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: CallOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct DownBackend;

    #[async_trait]
    impl TextBackend for DownBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: CallOptions,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::Api {
                provider: Provider::Groq,
                status: 503,
                message: "unavailable".to_string(),
            })
        }
    }

    fn ctx_returning(response: &str) -> PipelineContext {
        let backend = Arc::new(ScriptedBackend(response.to_string()));
        PipelineContext::new(LlmRouter::new(backend.clone(), backend.clone(), backend))
    }

    fn ctx_down() -> PipelineContext {
        let backend = Arc::new(DownBackend);
        PipelineContext::new(LlmRouter::new(backend.clone(), backend.clone(), backend))
    }

    #[tokio::test]
    async fn test_socio_economic_parses_well_formed_output() {
        let ctx = ctx_returning(
            r#"{"location_constraints": ["small town"], "financial_analysis": "tight",
                "risk_capacity": "low", "restricted_career_types": ["unfunded startup"],
                "allowed_career_types": ["government"], "recommendations": ["scholarships"]}"#,
        );
        let summary = run_socio_economic(&ctx, &json!({"city": "Pune"}), &json!({})).await;
        assert_eq!(summary.risk_capacity, "low");
        assert_eq!(summary.location_constraints, vec!["small town"]);
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn test_socio_economic_coerces_map_shaped_lists() {
        let ctx = ctx_returning(
            r#"{"risk_capacity": "medium", "recommendations": {"first": "save money"}}"#,
        );
        let summary = run_socio_economic(&ctx, &json!({"city": "Pune"}), &json!({})).await;
        assert_eq!(summary.recommendations, vec!["save money"]);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_with_error_marker() {
        let ctx = ctx_down();
        let summary = run_socio_economic(&ctx, &json!({"city": "Pune"}), &json!({})).await;
        assert!(summary.error.is_some());
        assert!(summary.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_summary_serializes_error_field() {
        let summary = LearningSummary::degraded("boom".to_string());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["error"], "boom");
    }

    #[tokio::test]
    async fn test_clean_summary_omits_error_field() {
        let ctx = ctx_returning(r#"{"learning_gaps": ["statistics"]}"#);
        let summary = run_learning(&ctx, &json!({"studyPlan": "nights"}), &json!({}), None).await;
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["learning_gaps"], json!(["statistics"]));
    }

    #[tokio::test]
    async fn test_resume_fenced_output_is_recovered() {
        let ctx = ctx_returning(
            "```json\n{\"skills\": [\"rust\"], \"projects\": [], \"gaps\": [\"no cloud\"], \"role_alignment\": \"partial\"}\n```",
        );
        let summary = run_resume(&ctx, "Worked on embedded Rust.", &json!({}), Some("backend")).await;
        assert_eq!(summary.skills, vec!["rust"]);
        assert_eq!(summary.role_alignment, "partial");
    }

    #[tokio::test]
    async fn test_resume_prose_output_degrades_to_empty_summary() {
        let ctx = ctx_returning("I'm sorry, I cannot analyze this resume.");
        let summary = run_resume(&ctx, "text", &json!({}), None).await;
        assert!(summary.skills.is_empty());
        // Unparseable output is not a stage error, just absent data.
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn test_aptitude_scalar_domain_is_wrapped() {
        let ctx = ctx_returning(r#"{"suggested_domains": "data science"}"#);
        let summary = run_aptitude(&ctx, &json!({"bigFive": {}}), &json!({}), &json!({})).await;
        assert_eq!(summary.suggested_domains, vec!["data science"]);
    }

    #[tokio::test]
    async fn test_recommendation_parses_pathways() {
        let ctx = ctx_returning(
            r#"{"pathways": ["Data analyst: fits skills"], "roadmaps": ["Learn SQL in 30 days"]}"#,
        );
        let summary = run_recommendation(&ctx, &json!({"strengths": ["sql"]})).await;
        assert_eq!(summary.pathways.len(), 1);
        assert_eq!(summary.roadmaps.len(), 1);
    }

    #[test]
    fn test_slot_json_empty_section_is_none() {
        assert!(slot_json(&json!({})).is_none());
        assert!(slot_json(&json!(null)).is_none());
        assert_eq!(slot_json(&json!({"a": 1})), Some("{\"a\":1}".to_string()));
    }
}
