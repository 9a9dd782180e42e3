use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::models::WorkflowError;
use crate::services::AppState;

pub mod assignments;
pub mod progress;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut status = "healthy";
    let mut dependencies = serde_json::Map::new();
    let mut all_healthy = true;

    let storage_health = check_storage(&state).await;
    dependencies.insert("storage".to_string(), json!(storage_health));
    if storage_health.get("status").and_then(|v| v.as_str()) != Some("healthy") {
        all_healthy = false;
        status = "degraded";
    }

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "homeroom-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": dependencies
        })),
    )
}

async fn check_storage(state: &AppState) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();

    match tokio::time::timeout(std::time::Duration::from_secs(1), async {
        let conn = state.db.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
    })
    .await
    {
        Ok(Ok(_)) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert("message".to_string(), json!("SQLite workspace reachable"));
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("SQLite error: {}", e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("SQLite timeout after 1s"));
        }
    }

    result
}

/// Maps workflow errors to client-facing status codes; anything else is a 500
/// with the message logged, not leaked.
pub(crate) fn workflow_error_response(e: anyhow::Error) -> (StatusCode, String) {
    match e.downcast_ref::<WorkflowError>() {
        Some(WorkflowError::AssignmentNotFound) | Some(WorkflowError::SubmissionNotFound) => {
            (StatusCode::NOT_FOUND, e.to_string())
        }
        Some(WorkflowError::MaxAttemptsReached) | Some(WorkflowError::AlreadyFinalized) => {
            (StatusCode::CONFLICT, e.to_string())
        }
        None => {
            tracing::error!("Request failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}
