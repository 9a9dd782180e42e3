use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use std::time::Duration;

use crate::handlers::workflow_error_response;
use crate::models::submission::{OpenAssignmentRequest, SaveAnswerRequest};
use crate::services::backup_service::BackupService;
use crate::services::grading_service::GradingService;
use crate::services::submission_service::SubmissionService;
use crate::services::AppState;

fn submission_service(state: &AppState) -> SubmissionService {
    SubmissionService::new(
        state.db.clone(),
        BackupService::new(state.config.backup_dir()),
    )
}

/// POST /api/v1/assignments/{id}/open
pub async fn open_assignment(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    Json(payload): Json<OpenAssignmentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let response = submission_service(&state)
        .open_assignment(&assignment_id, &payload.student_id)
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(response))
}

/// PUT /api/v1/submissions/{id}/answers/{question_id}
pub async fn save_answer(
    State(state): State<Arc<AppState>>,
    Path((submission_id, question_id)): Path<(String, String)>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Per-question single flight: a newer save for the same slot wins.
    let ticket = state
        .saves
        .begin(&format!("{}:{}", submission_id, question_id));

    let response = submission_service(&state)
        .save_answer(&submission_id, &question_id, &payload, &ticket)
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(response))
}

/// POST /api/v1/submissions/{id}/finalize
pub async fn finalize_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let grading = GradingService::new(
        state.grader.clone(),
        Duration::from_secs(state.config.grader_timeout_secs),
    );

    let response = submission_service(&state)
        .finalize(&submission_id, &grading)
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(response))
}
