use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use homeroom_api::{config::Config, create_router, services::AppState};

/// Builds the app over a throwaway SQLite workspace. The grading delegate is
/// pointed at a closed port so open-ended questions always exercise the
/// deterministic keyword fallback.
pub async fn create_test_app() -> Router {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let workspace = std::env::temp_dir().join(format!("homeroom-it-{}", Uuid::new_v4()));

    let config = Config {
        workspace_dir: workspace.to_string_lossy().into_owned(),
        grader_url: "http://127.0.0.1:9".to_string(),
        grader_timeout_secs: 1,
        listen_addr: "127.0.0.1:0".to_string(),
    };

    let app_state = Arc::new(AppState::new(config).expect("Failed to initialize test app state"));

    seed_assignments(&app_state).await;

    create_router(app_state)
}

async fn seed_assignments(state: &AppState) {
    let conn = state.db.lock().await;
    conn.execute_batch(
        "INSERT INTO assignments(id, subject, title, instructions, max_attempts)
         VALUES('fractions-intro', 'math', 'Intro to Fractions', 'Work through each question.', NULL);

         INSERT INTO questions(id, assignment_id, position, kind, prompt, points, correct_answer, tolerance, explanation)
         VALUES('q1', 'fractions-intro', 1, 'numeric', 'What is 7/2?', 2.0, '3.5', NULL, NULL);
         INSERT INTO questions(id, assignment_id, position, kind, prompt, points, correct_answer, tolerance, explanation)
         VALUES('q2', 'fractions-intro', 2, 'multiple_choice', 'Capital of France?', 1.0, 'Paris', NULL, NULL);
         INSERT INTO questions(id, assignment_id, position, kind, prompt, points, correct_answer, tolerance, explanation)
         VALUES('q3', 'fractions-intro', 3, 'short_answer', 'Describe photosynthesis.', 2.0, 'plants make food from sunlight', NULL, NULL);
         INSERT INTO questions(id, assignment_id, position, kind, prompt, points, correct_answer, tolerance, explanation)
         VALUES('q4', 'fractions-intro', 4, 'numeric', 'Estimate 9.7 + 0.3', 1.0, '10', 0.5, NULL);

         INSERT INTO assignments(id, subject, title, instructions, max_attempts)
         VALUES('unit-quiz', 'math', 'Unit Quiz', 'Two tries only.', 2);
         INSERT INTO questions(id, assignment_id, position, kind, prompt, points, correct_answer, tolerance, explanation)
         VALUES('uq1', 'unit-quiz', 1, 'multiple_choice', 'Pick B.', 1.0, 'B', NULL, NULL);",
    )
    .expect("seed test assignments");
}

#[allow(dead_code)]
pub async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri, Some(body)).await
}

#[allow(dead_code)]
pub async fn put_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, "PUT", uri, Some(body)).await
}

#[allow(dead_code)]
pub async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None).await
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&v).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()))
    };

    (status, json)
}
