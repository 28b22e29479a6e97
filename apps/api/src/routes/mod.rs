pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::pipeline::handlers as pipeline_handlers;
use crate::profile::handlers as profile_handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Profile intake
        .route(
            "/api/v1/profile/submit-info",
            post(profile_handlers::handle_submit_info),
        )
        .route(
            "/api/v1/tests/:test_name",
            post(profile_handlers::handle_test_scores),
        )
        .route("/api/v1/resume", post(profile_handlers::handle_resume))
        // Cross-examination round
        .route(
            "/api/v1/cross-exam/questions",
            post(pipeline_handlers::handle_cross_exam_questions),
        )
        .route(
            "/api/v1/cross-exam/answers",
            post(pipeline_handlers::handle_cross_exam_answers),
        )
        // Finalize task
        .route("/api/v1/finalize", post(pipeline_handlers::handle_finalize))
        .route(
            "/api/v1/finalize/status/:task_id",
            get(pipeline_handlers::handle_finalize_status),
        )
        // Stored report
        .route(
            "/api/v1/analysis",
            get(profile_handlers::handle_get_analysis),
        )
        .with_state(state)
}
