//! Finalize sequencer: runs the dependent tail of the pipeline
//! (GapAnalysis → Recommendation → FinalReport) as a durable background
//! task, consuming the stage partials accumulated under
//! `aiInsights.partials` and persisting one consolidated report.
//!
//! Stage ordering: GapAnalysis consumes the SocioEconomic, Resume,
//! Aptitude, and CrossExam partials; Recommendation consumes the gap
//! report; FinalReport consolidates both. Each dependent stage observes its
//! dependency's completed (possibly degraded) result before starting.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm::normalize::normalize;
use crate::pipeline::agents::{run_recommendation, slot_json, RecommendationSummary};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::prompts::{render, template_for};
use crate::pipeline::report::{normalize_final_report, FinalAnalysis};
use crate::pipeline::Stage;
use crate::profile::models::ProfileDoc;
use crate::profile::store::ProfileStore;
use crate::profile::tasks::TaskUpdate;

/// Hard constraints threaded from earlier partials into the gap prompt.
/// Absent fields are dropped so the model never sees empty labels.
fn build_constraints(socio: &Value, resume: &Value, aptitude: &Value) -> Value {
    let mut constraints = Map::new();
    let mut put = |key: &str, value: Option<&Value>| {
        if let Some(v) = value {
            if !crate::profile::store::is_empty_value(v) {
                constraints.insert(key.to_string(), v.clone());
            }
        }
    };

    put("risk_capacity", socio.get("risk_capacity"));
    put("restricted_career_types", socio.get("restricted_career_types"));
    put("allowed_career_types", socio.get("allowed_career_types"));
    put("resume_alignment", resume.get("role_alignment"));
    put("resume_risks", resume.get("resume_risk_factors"));
    put("aptitude_conflicts", aptitude.get("conflicts"));

    Value::Object(constraints)
}

/// Runs the gap-analysis stage over the accumulated partials.
/// Degrades to `{"error": ...}` on provider failure, like every
/// non-quality-gated stage.
pub async fn run_gap_analysis(ctx: &PipelineContext, profile: &ProfileDoc) -> Value {
    let socio = profile.partial(Stage::SocioEconomic.partial_key());
    let learning = profile.partial(Stage::LearningRoadmap.partial_key());
    let resume = profile.partial(Stage::ResumeAnalysis.partial_key());
    let aptitude = profile.partial(Stage::AptitudeInterest.partial_key());
    let cross = profile.partial(Stage::CrossExam.partial_key());

    let constraints = build_constraints(&socio, &resume, &aptitude);

    let prompt = render(
        template_for(Stage::GapAnalysis),
        &[
            ("personal_info", slot_json(&profile.personal())),
            ("optional_fields", slot_json(&profile.optional_fields())),
            ("socio_summary", slot_json(&socio)),
            ("resume_summary", slot_json(&resume)),
            ("learning_summary", slot_json(&learning)),
            ("aptitude_summary", slot_json(&aptitude)),
            ("cross_summary", slot_json(&cross)),
            ("constraints", slot_json(&constraints)),
        ],
    );

    match ctx.call_stage(Stage::GapAnalysis, &prompt).await {
        Ok(raw) => normalize(&raw, json!({})),
        Err(e) => {
            warn!(stage = "gapAnalysis", "Stage degraded: {e}");
            json!({"error": e.to_string()})
        }
    }
}

/// Consolidates the gap report and pathway recommendations into the final
/// user-facing report. Falls back to normalizing the gap report directly
/// when the consolidation call degrades.
pub async fn run_final_report(
    ctx: &PipelineContext,
    gap_report: &Value,
    recommendations: &RecommendationSummary,
) -> FinalAnalysis {
    let rec_value = serde_json::to_value(recommendations).unwrap_or(Value::Null);
    let prompt = render(
        template_for(Stage::FinalReport),
        &[
            ("gap_report", slot_json(gap_report)),
            ("recommendations", slot_json(&rec_value)),
        ],
    );

    match ctx.call_stage(Stage::FinalReport, &prompt).await {
        Ok(raw) => {
            let consolidated = normalize(&raw, gap_report.clone());
            normalize_final_report(&consolidated)
        }
        Err(e) => {
            warn!(stage = "finalReport", "Consolidation degraded, using gap report: {e}");
            normalize_final_report(gap_report)
        }
    }
}

/// Entry point for the fire-and-forget finalize task. The task record is
/// already persisted as running; this drives it to a terminal state no
/// matter what happens, including a run that exceeds the timeout.
pub async fn run_finalize_task(
    store: Arc<dyn ProfileStore>,
    ctx: PipelineContext,
    task_id: Uuid,
    email: String,
    timeout: Duration,
) {
    let run = finalize(store.clone(), ctx, task_id, &email);

    let outcome = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Internal(anyhow::anyhow!(
            "Finalize run exceeded {}s",
            timeout.as_secs()
        ))),
    };

    if let Err(e) = outcome {
        error!(%task_id, "Finalize task failed: {e}");
        if let Err(e) = store
            .update_task(task_id, TaskUpdate::failed(e.to_string()))
            .await
        {
            error!(%task_id, "Could not record task failure: {e}");
        }
    }
}

async fn finalize(
    store: Arc<dyn ProfileStore>,
    ctx: PipelineContext,
    task_id: Uuid,
    email: &str,
) -> Result<(), AppError> {
    // Stage 0: collect partials.
    store.update_task(task_id, TaskUpdate::stage(0)).await?;

    let doc = store
        .find_profile(email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No profile for {email}")))?;
    let profile = ProfileDoc::new(doc);

    // Stage 1: gap analysis.
    store.update_task(task_id, TaskUpdate::stage(1)).await?;
    let gap_report = run_gap_analysis(&ctx, &profile).await;

    // Stage 2: pathway recommendations.
    store.update_task(task_id, TaskUpdate::stage(2)).await?;
    let recommendations = run_recommendation(&ctx, &gap_report).await;

    // Stage 3: consolidate, normalize, persist.
    store.update_task(task_id, TaskUpdate::stage(3)).await?;
    let report = run_final_report(&ctx, &gap_report, &recommendations).await;

    let degraded = gap_report.get("error").is_some();
    let mut report_value = serde_json::to_value(&report)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize report: {e}")))?;
    report_value["_meta"] = json!({
        "generated_by": "gap-analysis",
        "quality": if degraded { "degraded" } else { "ok" },
    });

    store.record_final_analysis(email, report_value.clone()).await?;
    store
        .update_task(
            task_id,
            TaskUpdate::completed(json!({ "final_report": report_value })),
        )
        .await?;

    info!(%task_id, email, "Finalize task completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::llm::backend::TextBackend;
    use crate::llm::{CallOptions, LlmRouter, Provider, ProviderError};
    use crate::profile::store::MemoryProfileStore;
    use crate::profile::tasks::{TaskRecord, TaskStatus};

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

    /// Hangs forever; exercises the timeout guard around the finalize run.
    struct StalledBackend;

    #[async_trait]
    impl TextBackend for StalledBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: CallOptions,
        ) -> Result<String, ProviderError> {
            std::future::pending().await
        }
    }

    fn ctx_returning(text: &str) -> PipelineContext {
        let backend = Arc::new(ScriptedBackend(text.to_string()));
        PipelineContext::new(LlmRouter::new(backend.clone(), backend.clone(), backend))
    }

    fn gap_json() -> String {
        json!({
            "friendly_summary": "Honest but hopeful.",
            "top_careers": [
                {"name": "Analyst", "category": "SAFE", "merits": ["fit"],
                 "demerits": ["routine"], "trends": ["steady"]},
                {"name": "Archivist", "category": "NON_OBVIOUS", "merits": ["detail"],
                 "demerits": ["niche"], "trends": ["small market"]},
                {"name": "Founder", "category": "HIGH_RISK", "merits": ["drive"],
                 "demerits": ["capital"], "trends": ["volatile"]}
            ],
            "strengths": ["persistence"],
            "weaknesses": ["indecision"],
            "skill_gaps": ["sql"],
            "suggestions": ["talk to an analyst"],
            "next_steps": ["30 days: course"],
            "pathways": ["Analyst: best fit"],
            "roadmaps": ["Learn SQL"]
        })
        .to_string()
    }

    async fn seeded_store() -> Arc<MemoryProfileStore> {
        let store = Arc::new(MemoryProfileStore::new());
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(
            "personal".to_string(),
            json!({"fullName": "Ada", "city": "London"}),
        );
        fields.insert(
            "aiInsights.partials.socioEconomic".to_string(),
            json!({"risk_capacity": "low"}),
        );
        store.upsert_fields("ada@example.com", fields).await.unwrap();
        store
    }

    #[test]
    fn test_build_constraints_skips_absent_fields() {
        let constraints = build_constraints(
            &json!({"risk_capacity": "low", "restricted_career_types": []}),
            &json!({"role_alignment": "partial"}),
            &json!({}),
        );
        assert_eq!(constraints["risk_capacity"], "low");
        assert_eq!(constraints["resume_alignment"], "partial");
        // Empty list and missing conflicts are dropped.
        assert!(constraints.get("restricted_career_types").is_none());
        assert!(constraints.get("aptitude_conflicts").is_none());
    }

    #[tokio::test]
    async fn test_fresh_task_polls_as_running_stage_zero() {
        let store = seeded_store().await;
        let task_id = Uuid::new_v4();
        store
            .create_task(TaskRecord::new(task_id, "ada@example.com".to_string()))
            .await
            .unwrap();

        let task = store.find_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.current_stage, 0);
    }

    #[tokio::test]
    async fn test_finalize_completes_and_persists_report() {
        let store = seeded_store().await;
        let task_id = Uuid::new_v4();
        store
            .create_task(TaskRecord::new(task_id, "ada@example.com".to_string()))
            .await
            .unwrap();

        run_finalize_task(
            store.clone(),
            ctx_returning(&gap_json()),
            task_id,
            "ada@example.com".to_string(),
            Duration::from_secs(30),
        )
        .await;

        let task = store.find_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.current_stage, 3);
        let report = &task.partial_report.unwrap()["final_report"];
        assert_eq!(report["top_careers"].as_array().unwrap().len(), 3);
        assert_eq!(report["_meta"]["quality"], "ok");

        let doc = store.find_profile("ada@example.com").await.unwrap().unwrap();
        assert_eq!(doc["finalAnalysis"]["friendly_summary"], "Honest but hopeful.");
    }

    #[tokio::test]
    async fn test_finalize_with_all_providers_down_still_completes_degraded() {
        let store = seeded_store().await;
        let task_id = Uuid::new_v4();
        store
            .create_task(TaskRecord::new(task_id, "ada@example.com".to_string()))
            .await
            .unwrap();

        let backend = Arc::new(DownBackend);
        let ctx = PipelineContext::new(LlmRouter::new(backend.clone(), backend.clone(), backend));

        run_finalize_task(
            store.clone(),
            ctx,
            task_id,
            "ada@example.com".to_string(),
            Duration::from_secs(30),
        )
        .await;

        // Stage failures degrade; the run still reaches a terminal state
        // with a placeholder-filled report.
        let task = store.find_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let report = &task.partial_report.unwrap()["final_report"];
        assert_eq!(report["_meta"]["quality"], "degraded");
        assert_eq!(report["strengths"][0], "No data available");
        assert_eq!(report["top_careers"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_finalize_unknown_profile_fails_task() {
        let store = Arc::new(MemoryProfileStore::new());
        let task_id = Uuid::new_v4();
        store
            .create_task(TaskRecord::new(task_id, "ghost@example.com".to_string()))
            .await
            .unwrap();

        run_finalize_task(
            store.clone(),
            ctx_returning(&gap_json()),
            task_id,
            "ghost@example.com".to_string(),
            Duration::from_secs(30),
        )
        .await;

        let task = store.find_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("No profile"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_over_deadline_fails_task() {
        let store = seeded_store().await;
        let task_id = Uuid::new_v4();
        store
            .create_task(TaskRecord::new(task_id, "ada@example.com".to_string()))
            .await
            .unwrap();

        let backend = Arc::new(StalledBackend);
        let ctx = PipelineContext::new(LlmRouter::new(backend.clone(), backend.clone(), backend));

        // Paused time auto-advances past the deadline while the backend hangs.
        run_finalize_task(
            store.clone(),
            ctx,
            task_id,
            "ada@example.com".to_string(),
            Duration::from_secs(120),
        )
        .await;

        let task = store.find_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("exceeded 120s"));
    }
}
