use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::handlers::workflow_error_response;
use crate::models::progress::{AdvanceProgressRequest, JumpProgressRequest, ProgressQuery};
use crate::services::progress_service::ProgressService;
use crate::services::AppState;

/// GET /api/v1/assignments/{id}/progress?student_id=...
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = ProgressService::new(state.db.clone())
        .load_or_init(&assignment_id, &query.student_id)
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(record))
}

/// POST /api/v1/assignments/{id}/progress/advance
pub async fn advance_phase(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    Json(payload): Json<AdvanceProgressRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = ProgressService::new(state.db.clone())
        .advance(
            &assignment_id,
            &payload.student_id,
            payload.to_phase,
            payload.mark_prior_complete,
        )
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(record))
}

/// POST /api/v1/assignments/{id}/progress/jump
pub async fn jump_phase(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    Json(payload): Json<JumpProgressRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = ProgressService::new(state.db.clone())
        .jump(&assignment_id, &payload.student_id, payload.to_phase)
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(record))
}
