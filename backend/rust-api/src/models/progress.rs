use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five workflow steps, in their fixed order.
pub const PHASE_ORDER: [Phase; 5] = [
    Phase::Research,
    Phase::Notes,
    Phase::Discussion,
    Phase::Practice,
    Phase::Assessment,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Research,
    Notes,
    Discussion,
    Practice,
    Assessment,
}

impl Phase {
    pub fn first() -> Phase {
        PHASE_ORDER[0]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Notes => "notes",
            Phase::Discussion => "discussion",
            Phase::Practice => "practice",
            Phase::Assessment => "assessment",
        }
    }

    pub fn parse(s: &str) -> Option<Phase> {
        PHASE_ORDER.iter().copied().find(|p| p.as_str() == s)
    }
}

/// Per (assignment, student) workflow position. Upserted in place on every
/// transition; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub assignment_id: String,
    pub student_id: String,
    pub current_phase: Phase,
    /// Completion set, in completion order. Membership is idempotent.
    pub completed_phases: Vec<Phase>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(assignment_id: &str, student_id: &str) -> Self {
        Self {
            assignment_id: assignment_id.to_string(),
            student_id: student_id.to_string(),
            current_phase: Phase::first(),
            completed_phases: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub student_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceProgressRequest {
    pub student_id: String,
    pub to_phase: Phase,
    #[serde(default = "default_mark_prior")]
    pub mark_prior_complete: bool,
}

fn default_mark_prior() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct JumpProgressRequest {
    pub student_id: String,
    pub to_phase: Phase,
}
