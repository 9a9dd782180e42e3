use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of grading one question. `score` is normalized to [0, 1];
/// the point value is applied during aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub is_correct: bool,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl GradeOutcome {
    pub fn incorrect() -> Self {
        Self {
            is_correct: false,
            score: 0.0,
            feedback: None,
        }
    }
}

/// Body shape returned by the external `grade-open-response` function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateScore {
    pub score: f64,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRecord {
    pub id: String,
    pub submission_id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub score: f64,
    pub max_score: f64,
    pub graded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpAward {
    pub id: String,
    pub student_id: String,
    pub assignment_id: String,
    pub submission_id: String,
    pub amount: i64,
    pub awarded_at: DateTime<Utc>,
}
