use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::grade::GradeOutcome;

/// One attempt by one student at one assignment. `submitted_at = None` marks
/// the current draft; at most one draft may exist per (assignment, student).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub attempt_no: u32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub content: SubmissionContent,
    pub total_time_seconds: u32,
}

/// Free-form content blob carried on the submission row. While drafting it
/// only tracks the resume cursor; finalize writes the full answer set,
/// per-question outcomes, and the aggregate score into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionContent {
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub question_times: BTreeMap<String, u32>,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub results: BTreeMap<String, GradeOutcome>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
}

/// One student's answer to one question within one attempt.
/// Unique per (submission, question, attempt); upserted, never duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub submission_id: String,
    pub question_id: String,
    pub attempt_no: u32,
    pub answer: String,
    pub is_correct: Option<bool>,
    pub time_spent_seconds: u32,
}

#[derive(Debug, Deserialize)]
pub struct OpenAssignmentRequest {
    pub student_id: String,
}

#[derive(Debug, Serialize)]
pub struct OpenAssignmentResponse {
    pub submission_id: String,
    pub attempt_no: u32,
    pub answers: BTreeMap<String, String>,
    pub question_times: BTreeMap<String, u32>,
    pub current_index: usize,
    pub restored_from_backup: bool,
    /// None when the assignment has no attempt limit.
    pub attempts_remaining: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SaveAnswerRequest {
    pub answer: String,
    #[serde(default)]
    pub time_spent_seconds: u32,
    #[serde(default)]
    pub current_index: usize,
}

/// Persistent save failure is reported, not thrown, so the caller can block
/// navigation without crashing.
#[derive(Debug, Serialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    /// A newer save for the same question arrived while this one was in
    /// flight; this write was coalesced away.
    pub superseded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub submission_id: String,
    pub attempt_no: u32,
    pub score: f64,
    pub max_score: f64,
    pub results: BTreeMap<String, GradeOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_blob_tolerates_missing_fields() {
        let content: SubmissionContent = serde_json::from_str("{}").unwrap();
        assert!(content.answers.is_empty());
        assert_eq!(content.current_index, 0);
        assert!(content.score.is_none());
    }

    #[test]
    fn content_blob_roundtrip_keeps_cursor() {
        let mut content = SubmissionContent::default();
        content.answers.insert("q1".into(), "3.5".into());
        content.current_index = 2;
        let json = serde_json::to_string(&content).unwrap();
        let back: SubmissionContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.current_index, 2);
        assert_eq!(back.answers.get("q1").map(String::as_str), Some("3.5"));
    }
}
