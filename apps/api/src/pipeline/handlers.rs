//! Handlers for the cross-examination round and the finalize task.
//!
//! Cross-exam question generation is the only quality-gated stage: a
//! provider failure or an under-filled question list surfaces as an error
//! instead of degrading, because answers collected against a broken
//! question set would poison every downstream stage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm::normalize::coerce_string_list;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::cross_exam::{
    analyze_answers, generate_followups, generate_questions, CrossExamSummary,
    MAX_FOLLOWUP_ROUNDS,
};
use crate::pipeline::sequencer::run_finalize_task;
use crate::profile::models::ProfileDoc;
use crate::profile::store::ProfileStore;
use crate::profile::tasks::{TaskRecord, TaskStatus};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct QuestionsResponse {
    pub questions: Vec<String>,
}

#[derive(Deserialize)]
pub struct AnswersRequest {
    pub email: String,
    pub answers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnswersResponse {
    pub analysis: CrossExamSummary,
    pub followups: Vec<String>,
}

#[derive(Serialize)]
pub struct FinalizeResponse {
    pub task_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub current_stage: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_report: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

async fn load_profile(store: &dyn ProfileStore, email: &str) -> Result<ProfileDoc, AppError> {
    let doc = store
        .find_profile(email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No profile for {email}")))?;
    Ok(ProfileDoc::new(doc))
}

pub async fn generate_and_store_questions(
    store: &dyn ProfileStore,
    ctx: &PipelineContext,
    email: &str,
) -> Result<Vec<String>, AppError> {
    let profile = load_profile(store, email).await?;
    let questions = generate_questions(ctx, &profile).await?;

    let mut fields = BTreeMap::new();
    fields.insert("crossExam.questions".to_string(), json!(questions));
    fields.insert("crossExam.answers".to_string(), json!([]));
    store.upsert_fields(email, fields).await?;

    Ok(questions)
}

pub async fn analyze_and_store_answers(
    store: &dyn ProfileStore,
    ctx: &PipelineContext,
    email: &str,
    answers: &[String],
) -> Result<AnswersResponse, AppError> {
    let profile = load_profile(store, email).await?;

    let questions = coerce_string_list(Some(&profile.section("crossExam.questions")));
    if questions.is_empty() {
        return Err(AppError::Validation(
            "No cross-exam questions on record; generate questions first".to_string(),
        ));
    }
    if answers.iter().all(|a| a.trim().is_empty()) {
        return Err(AppError::UnprocessableEntity(
            "At least one non-empty answer is required".to_string(),
        ));
    }

    let summary = analyze_answers(ctx, &profile, &questions, answers).await;

    // At most MAX_FOLLOWUP_ROUNDS answer rounds produce follow-ups; later
    // rounds only refresh the analysis.
    let rounds = profile
        .get("crossExam.followupRounds")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let followups = if rounds < MAX_FOLLOWUP_ROUNDS {
        generate_followups(ctx, &profile, &questions, answers).await
    } else {
        vec![]
    };

    let summary_value = serde_json::to_value(&summary)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Summary serialization: {e}")))?;

    let mut fields = BTreeMap::new();
    fields.insert("crossExam.answers".to_string(), json!(answers));
    fields.insert("crossExam.analysis".to_string(), summary_value.clone());
    fields.insert("aiInsights.partials.crossExam".to_string(), summary_value);
    if !followups.is_empty() {
        let mut all = coerce_string_list(profile.get("crossExam.followups"));
        all.extend(followups.iter().cloned());
        fields.insert("crossExam.followups".to_string(), json!(all));
        fields.insert("crossExam.followupRounds".to_string(), json!(rounds + 1));
    }
    store.upsert_fields(email, fields).await?;

    Ok(AnswersResponse {
        analysis: summary,
        followups,
    })
}

/// Creates the task record BEFORE spawning, so a status poll that races
/// the spawn still sees `running` at stage 0.
pub async fn start_finalize(
    store: Arc<dyn ProfileStore>,
    ctx: PipelineContext,
    email: &str,
    timeout: Duration,
) -> Result<Uuid, AppError> {
    load_profile(store.as_ref(), email).await?;

    let task_id = Uuid::new_v4();
    store
        .create_task(TaskRecord::new(task_id, email.to_string()))
        .await?;

    info!(%task_id, email, "Spawning finalize task");
    tokio::spawn(run_finalize_task(
        store,
        ctx,
        task_id,
        email.to_string(),
        timeout,
    ));

    Ok(task_id)
}

/// POST /api/v1/cross-exam/questions
pub async fn handle_cross_exam_questions(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<QuestionsResponse>, AppError> {
    let ctx = state.pipeline_context();
    let questions = generate_and_store_questions(state.store.as_ref(), &ctx, &req.email).await?;
    Ok(Json(QuestionsResponse { questions }))
}

/// POST /api/v1/cross-exam/answers
pub async fn handle_cross_exam_answers(
    State(state): State<AppState>,
    Json(req): Json<AnswersRequest>,
) -> Result<Json<AnswersResponse>, AppError> {
    let ctx = state.pipeline_context();
    let response =
        analyze_and_store_answers(state.store.as_ref(), &ctx, &req.email, &req.answers).await?;
    Ok(Json(response))
}

/// POST /api/v1/finalize
pub async fn handle_finalize(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<FinalizeResponse>, AppError> {
    let timeout = Duration::from_secs(state.config.finalize_timeout_secs);
    let ctx = state.pipeline_context();
    let task_id = start_finalize(state.store.clone(), ctx, &req.email, timeout).await?;
    Ok(Json(FinalizeResponse { task_id }))
}

/// GET /api/v1/finalize/status/:task_id
pub async fn handle_finalize_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskStatusResponse>, AppError> {
    let task = state
        .store
        .find_task(task_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No task {task_id}")))?;

    Ok(Json(TaskStatusResponse {
        task_id: task.task_id,
        status: task.status,
        current_stage: task.current_stage,
        partial_report: task.partial_report,
        error: task.error,
        created_at: task.created_at,
        updated_at: task.updated_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::llm::backend::TextBackend;
    use crate::llm::{CallOptions, LlmRouter, ProviderError};
    use crate::profile::store::MemoryProfileStore;

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

    /// Returns queued responses in order; one backend call pops one entry.
    struct SequenceBackend(std::sync::Mutex<std::collections::VecDeque<String>>);

    impl SequenceBackend {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(
                responses.iter().map(|s| s.to_string()).collect(),
            )))
        }
    }

    #[async_trait]
    impl TextBackend for SequenceBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: CallOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.0.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn ctx_returning(text: &str) -> PipelineContext {
        let backend = Arc::new(ScriptedBackend(text.to_string()));
        PipelineContext::new(LlmRouter::new(backend.clone(), backend.clone(), backend))
    }

    async fn seeded_store() -> Arc<MemoryProfileStore> {
        let store = Arc::new(MemoryProfileStore::new());
        let mut fields = BTreeMap::new();
        fields.insert("personal".to_string(), json!({"fullName": "Ada"}));
        store.upsert_fields("ada@example.com", fields).await.unwrap();
        store
    }

    fn five_questions() -> String {
        json!(["q1?", "q2?", "q3?", "q4?", "q5?"]).to_string()
    }

    #[tokio::test]
    async fn test_questions_persisted_under_cross_exam() {
        let store = seeded_store().await;
        let ctx = ctx_returning(&five_questions());

        let questions = generate_and_store_questions(store.as_ref(), &ctx, "ada@example.com")
            .await
            .unwrap();
        assert_eq!(questions.len(), 5);

        let doc = store.find_profile("ada@example.com").await.unwrap().unwrap();
        assert_eq!(doc["crossExam"]["questions"][0], "q1?");
        assert_eq!(doc["crossExam"]["answers"], json!([]));
        // Sibling sections survive the upsert.
        assert_eq!(doc["personal"]["fullName"], "Ada");
    }

    #[tokio::test]
    async fn test_questions_unknown_profile_is_not_found() {
        let store = MemoryProfileStore::new();
        let ctx = ctx_returning(&five_questions());

        let err = generate_and_store_questions(&store, &ctx, "ghost@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_answers_without_questions_rejected() {
        let store = seeded_store().await;
        let ctx = ctx_returning("{}");

        let err = analyze_and_store_answers(
            store.as_ref(),
            &ctx,
            "ada@example.com",
            &["an answer".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_blank_answers_rejected() {
        let store = seeded_store().await;
        let ctx = ctx_returning(&five_questions());
        generate_and_store_questions(store.as_ref(), &ctx, "ada@example.com")
            .await
            .unwrap();

        let err = analyze_and_store_answers(
            store.as_ref(),
            &ctx,
            "ada@example.com",
            &["   ".to_string(), "".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::UnprocessableEntity(_)));
    }

    #[tokio::test]
    async fn test_answers_store_analysis_partial() {
        let store = seeded_store().await;
        let gen_ctx = ctx_returning(&five_questions());
        generate_and_store_questions(store.as_ref(), &gen_ctx, "ada@example.com")
            .await
            .unwrap();

        let analysis = json!({
            "strengths": ["curiosity"],
            "weaknesses": [],
            "skill_gaps": ["statistics"],
            "suggestions": [],
            "next_steps": [],
            "friendly_summary": "You ask good questions."
        });
        let ctx = ctx_returning(&analysis.to_string());

        let answers = vec!["a1".to_string(), "a2".to_string()];
        let response =
            analyze_and_store_answers(store.as_ref(), &ctx, "ada@example.com", &answers)
                .await
                .unwrap();
        assert_eq!(response.analysis.friendly_summary, "You ask good questions.");
        // The backend answered with an object, not a follow-up array.
        assert!(response.followups.is_empty());

        let doc = store.find_profile("ada@example.com").await.unwrap().unwrap();
        assert_eq!(doc["crossExam"]["answers"][0], "a1");
        assert_eq!(
            doc["aiInsights"]["partials"]["crossExam"]["strengths"][0],
            "curiosity"
        );
        // Questions from the earlier round are preserved.
        assert_eq!(doc["crossExam"]["questions"][4], "q5?");
    }

    #[tokio::test]
    async fn test_followups_appended_across_rounds() {
        let store = seeded_store().await;
        let gen_ctx = ctx_returning(&five_questions());
        generate_and_store_questions(store.as_ref(), &gen_ctx, "ada@example.com")
            .await
            .unwrap();

        let backend = SequenceBackend::new(&[
            "{}",
            r#"[{"question": "f1?", "type": "expansion", "confidence": 0.8}]"#,
            "{}",
            r#"["f2?", "f3?"]"#,
        ]);
        let router = LlmRouter::new(backend.clone(), backend.clone(), backend);

        let first = analyze_and_store_answers(
            store.as_ref(),
            &PipelineContext::new(router.clone()),
            "ada@example.com",
            &["round one".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(first.followups, vec!["f1?"]);

        let second = analyze_and_store_answers(
            store.as_ref(),
            &PipelineContext::new(router),
            "ada@example.com",
            &["round two".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(second.followups, vec!["f2?", "f3?"]);

        let doc = store.find_profile("ada@example.com").await.unwrap().unwrap();
        assert_eq!(doc["crossExam"]["followups"], json!(["f1?", "f2?", "f3?"]));
        assert_eq!(doc["crossExam"]["followupRounds"], json!(2));
    }

    #[tokio::test]
    async fn test_followups_stop_after_round_cap() {
        let store = seeded_store().await;
        let gen_ctx = ctx_returning(&five_questions());
        generate_and_store_questions(store.as_ref(), &gen_ctx, "ada@example.com")
            .await
            .unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("crossExam.followups".to_string(), json!(["f1?", "f2?"]));
        fields.insert(
            "crossExam.followupRounds".to_string(),
            json!(MAX_FOLLOWUP_ROUNDS),
        );
        store.upsert_fields("ada@example.com", fields).await.unwrap();

        // Only the analysis call should reach the backend; a follow-up call
        // would pop the array and come back non-empty.
        let backend = SequenceBackend::new(&["{}", r#"["f3?"]"#]);
        let router = LlmRouter::new(backend.clone(), backend.clone(), backend.clone());

        let response = analyze_and_store_answers(
            store.as_ref(),
            &PipelineContext::new(router),
            "ada@example.com",
            &["round three".to_string()],
        )
        .await
        .unwrap();
        assert!(response.followups.is_empty());

        let doc = store.find_profile("ada@example.com").await.unwrap().unwrap();
        assert_eq!(doc["crossExam"]["followups"], json!(["f1?", "f2?"]));
        assert_eq!(doc["crossExam"]["followupRounds"], json!(2));
        assert_eq!(backend.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_finalize_requires_profile() {
        let store: Arc<MemoryProfileStore> = Arc::new(MemoryProfileStore::new());
        let ctx = ctx_returning("{}");

        let err = start_finalize(store, ctx, "ghost@example.com", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
