//! Profile intake handlers: user info submission, psychometric test scores,
//! resume data, and retrieval of the stored final analysis.
//!
//! Intake endpoints refresh the relevant `aiInsights.partials.*` entry as a
//! side effect, so the finalize run always consumes the freshest stage
//! output without re-running the whole pipeline.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::errors::AppError;
use crate::pipeline::agents::{
    run_aptitude, run_learning, run_resume, run_socio_economic, AptitudeSummary, LearningSummary,
    ResumeSummary, SocioEconomicSummary,
};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::Stage;
use crate::profile::models::{normalize_email, ProfileDoc, ResumeData};
use crate::profile::store::{is_empty_value, ProfileStore};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInfoRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub personal: Value,
    #[serde(default)]
    pub interests: Value,
    #[serde(default)]
    pub strengths_and_weaknesses: Value,
    #[serde(default)]
    pub learning_roadmap: Value,
    #[serde(default)]
    pub optional_fields: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInfoResponse {
    pub email: String,
    pub socio_economic: SocioEconomicSummary,
    pub learning: LearningSummary,
}

#[derive(Deserialize)]
pub struct TestScoresRequest {
    pub email: String,
    pub scores: Value,
}

#[derive(Debug, Serialize)]
pub struct TestScoresResponse {
    pub test: String,
    pub aptitude: AptitudeSummary,
}

#[derive(Deserialize)]
pub struct ResumeRequest {
    pub email: String,
    #[serde(flatten)]
    pub resume: ResumeData,
}

#[derive(Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

fn partial_path(stage: Stage) -> String {
    format!("aiInsights.partials.{}", stage.partial_key())
}

pub async fn submit_info(
    store: &dyn ProfileStore,
    ctx: &PipelineContext,
    req: SubmitInfoRequest,
) -> Result<SubmitInfoResponse, AppError> {
    let email = match req.email.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => normalize_email(e),
        _ => {
            return Err(AppError::UnprocessableEntity(
                "email is required".to_string(),
            ))
        }
    };

    let mut fields = BTreeMap::new();
    fields.insert("personal".to_string(), req.personal.clone());
    fields.insert("interests".to_string(), req.interests.clone());
    fields.insert(
        "strengthsAndWeaknesses".to_string(),
        req.strengths_and_weaknesses.clone(),
    );
    fields.insert("learningRoadmap".to_string(), req.learning_roadmap.clone());
    fields.insert("optionalFields".to_string(), req.optional_fields.clone());
    store.upsert_fields(&email, fields).await?;

    let user_name = req
        .personal
        .get("fullName")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty());

    // Independent stages, so they fan out concurrently.
    let (socio, learning) = tokio::join!(
        run_socio_economic(ctx, &req.personal, &req.optional_fields),
        run_learning(
            ctx,
            &req.learning_roadmap,
            &req.strengths_and_weaknesses,
            user_name,
        ),
    );

    let mut partials = BTreeMap::new();
    partials.insert(
        partial_path(Stage::SocioEconomic),
        serde_json::to_value(&socio)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Summary serialization: {e}")))?,
    );
    partials.insert(
        partial_path(Stage::LearningRoadmap),
        serde_json::to_value(&learning)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Summary serialization: {e}")))?,
    );
    store.upsert_fields(&email, partials).await?;

    info!(email, "Profile info stored and initial stages run");
    Ok(SubmitInfoResponse {
        email,
        socio_economic: socio,
        learning,
    })
}

/// Maps a URL test segment to its document key under `tests.`.
pub fn test_key(segment: &str) -> Option<&'static str> {
    match segment {
        "big-five" => Some("bigFive"),
        "riasec" => Some("riasec"),
        "aptitude" => Some("aptitude"),
        _ => None,
    }
}

pub async fn record_test_scores(
    store: &dyn ProfileStore,
    ctx: &PipelineContext,
    test: &str,
    req: TestScoresRequest,
) -> Result<TestScoresResponse, AppError> {
    let key = test_key(test)
        .ok_or_else(|| AppError::NotFound(format!("Unknown test: {test}")))?;
    if is_empty_value(&req.scores) {
        return Err(AppError::UnprocessableEntity(
            "scores must not be empty".to_string(),
        ));
    }

    let profile = load_profile(store, &req.email).await?;

    let mut fields = BTreeMap::new();
    fields.insert(format!("tests.{key}"), req.scores.clone());
    store.upsert_fields(&req.email, fields).await?;

    // Re-read so the refreshed aptitude view includes the new scores
    // alongside every previously stored test.
    let profile = match store.find_profile(&req.email).await? {
        Some(doc) => ProfileDoc::new(doc),
        None => profile,
    };
    let aptitude = run_aptitude(
        ctx,
        &profile.tests(),
        &profile.interests(),
        &profile.personal(),
    )
    .await;

    let mut partials = BTreeMap::new();
    partials.insert(
        partial_path(Stage::AptitudeInterest),
        serde_json::to_value(&aptitude)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Summary serialization: {e}")))?,
    );
    store.upsert_fields(&req.email, partials).await?;

    Ok(TestScoresResponse {
        test: key.to_string(),
        aptitude,
    })
}

pub async fn record_resume(
    store: &dyn ProfileStore,
    ctx: &PipelineContext,
    req: ResumeRequest,
) -> Result<ResumeSummary, AppError> {
    let profile = load_profile(store, &req.email).await?;

    let mut resume = req.resume;
    resume.dedupe_skills();

    let mut fields = BTreeMap::new();
    fields.insert(
        "resume".to_string(),
        serde_json::to_value(&resume)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Resume serialization: {e}")))?,
    );
    store.upsert_fields(&req.email, fields).await?;

    let preferred_role = profile.str_at("interests.preferredRole");
    let summary = run_resume(
        ctx,
        &resume.extracted_text,
        &profile.strengths_and_weaknesses(),
        preferred_role,
    )
    .await;

    let mut partials = BTreeMap::new();
    partials.insert(
        partial_path(Stage::ResumeAnalysis),
        serde_json::to_value(&summary)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Summary serialization: {e}")))?,
    );
    store.upsert_fields(&req.email, partials).await?;

    Ok(summary)
}

pub async fn fetch_final_analysis(
    store: &dyn ProfileStore,
    email: &str,
) -> Result<Value, AppError> {
    let profile = load_profile(store, email).await?;
    let analysis = profile.section("finalAnalysis");
    if is_empty_value(&analysis) {
        return Err(AppError::NotFound(format!(
            "No final analysis for {email}; run finalize first"
        )));
    }
    Ok(analysis)
}

async fn load_profile(store: &dyn ProfileStore, email: &str) -> Result<ProfileDoc, AppError> {
    let doc = store
        .find_profile(email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No profile for {email}")))?;
    Ok(ProfileDoc::new(doc))
}

// ────────────────────────────────────────────────────────────────────────────
// Axum glue
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/profile/submit-info
pub async fn handle_submit_info(
    State(state): State<AppState>,
    Json(req): Json<SubmitInfoRequest>,
) -> Result<Json<SubmitInfoResponse>, AppError> {
    let ctx = state.pipeline_context();
    let response = submit_info(state.store.as_ref(), &ctx, req).await?;
    Ok(Json(response))
}

/// POST /api/v1/tests/:test_name
pub async fn handle_test_scores(
    State(state): State<AppState>,
    Path(test_name): Path<String>,
    Json(req): Json<TestScoresRequest>,
) -> Result<Json<TestScoresResponse>, AppError> {
    let ctx = state.pipeline_context();
    let response = record_test_scores(state.store.as_ref(), &ctx, &test_name, req).await?;
    Ok(Json(response))
}

/// POST /api/v1/resume
pub async fn handle_resume(
    State(state): State<AppState>,
    Json(req): Json<ResumeRequest>,
) -> Result<Json<ResumeSummary>, AppError> {
    let ctx = state.pipeline_context();
    let summary = record_resume(state.store.as_ref(), &ctx, req).await?;
    Ok(Json(summary))
}

/// GET /api/v1/analysis?email=
pub async fn handle_get_analysis(
    State(state): State<AppState>,
    Query(params): Query<EmailQuery>,
) -> Result<Json<Value>, AppError> {
    let analysis = fetch_final_analysis(state.store.as_ref(), &params.email).await?;
    Ok(Json(analysis))
}
