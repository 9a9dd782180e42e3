mod common;

use axum::http::StatusCode;
use serde_json::json;

async fn open_draft(app: &axum::Router, assignment_id: &str, student_id: &str) -> String {
    let (status, body) = common::post_json(
        app,
        &format!("/api/v1/assignments/{}/open", assignment_id),
        json!({ "student_id": student_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["submission_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn saving_an_answer_succeeds_and_persists() {
    let app = common::create_test_app().await;
    let submission_id = open_draft(&app, "fractions-intro", "stu-1").await;

    let (status, body) = common::put_json(
        &app,
        &format!("/api/v1/submissions/{}/answers/q1", submission_id),
        json!({ "answer": "3.5", "time_spent_seconds": 12, "current_index": 1 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], true);
    assert_eq!(body["superseded"], false);
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn resaving_a_question_overwrites_in_place() {
    let app = common::create_test_app().await;
    let submission_id = open_draft(&app, "fractions-intro", "stu-1").await;
    let uri = format!("/api/v1/submissions/{}/answers/q1", submission_id);

    common::put_json(
        &app,
        &uri,
        json!({ "answer": "2", "time_spent_seconds": 5, "current_index": 0 }),
    )
    .await;
    let (status, body) = common::put_json(
        &app,
        &uri,
        json!({ "answer": "3.5", "time_spent_seconds": 20, "current_index": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], true);

    // one row per question: the reopened draft shows only the latest value
    let (_, reopened) = common::post_json(
        &app,
        "/api/v1/assignments/fractions-intro/open",
        json!({ "student_id": "stu-1" }),
    )
    .await;
    assert_eq!(reopened["answers"]["q1"], "3.5");
    assert_eq!(reopened["question_times"]["q1"], 20);
    assert_eq!(reopened["answers"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn saving_to_a_missing_submission_is_not_found() {
    let app = common::create_test_app().await;

    let (status, _) = common::put_json(
        &app,
        "/api/v1/submissions/no-such-submission/answers/q1",
        json!({ "answer": "3.5" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn saving_after_finalize_is_a_conflict() {
    let app = common::create_test_app().await;
    let submission_id = open_draft(&app, "unit-quiz", "stu-1").await;

    let (status, _) = common::post_json(
        &app,
        &format!("/api/v1/submissions/{}/finalize", submission_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = common::put_json(
        &app,
        &format!("/api/v1/submissions/{}/answers/uq1", submission_id),
        json!({ "answer": "B" }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.as_str().unwrap_or_default().contains("finalized"));
}

#[tokio::test]
async fn answers_on_different_questions_accumulate() {
    let app = common::create_test_app().await;
    let submission_id = open_draft(&app, "fractions-intro", "stu-1").await;

    for (question_id, answer) in [("q1", "3.5"), ("q2", "Paris"), ("q4", "10")] {
        let (status, body) = common::put_json(
            &app,
            &format!("/api/v1/submissions/{}/answers/{}", submission_id, question_id),
            json!({ "answer": answer, "time_spent_seconds": 10, "current_index": 2 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["saved"], true);
    }

    let (_, reopened) = common::post_json(
        &app,
        "/api/v1/assignments/fractions-intro/open",
        json!({ "student_id": "stu-1" }),
    )
    .await;
    assert_eq!(reopened["answers"].as_object().unwrap().len(), 3);
    assert_eq!(reopened["answers"]["q2"], "Paris");
}
