use serde::{Deserialize, Serialize};

/// Immutable task definition owned by curriculum authoring; this workflow
/// only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub subject: String,
    pub title: String,
    pub instructions: String,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    ShortAnswer,
    Numeric,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::ShortAnswer => "short_answer",
            QuestionKind::Numeric => "numeric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "multiple_choice" => Some(QuestionKind::MultipleChoice),
            "short_answer" => Some(QuestionKind::ShortAnswer),
            "numeric" => Some(QuestionKind::Numeric),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub assignment_id: String,
    pub position: u32,
    pub kind: QuestionKind,
    pub prompt: String,
    pub points: f64,
    /// Reference answer: option text, expected string, or a number rendered
    /// as text depending on `kind`.
    pub correct_answer: String,
    /// Numeric questions only; defaults to 0.01 when unset.
    pub tolerance: Option<f64>,
    pub explanation: Option<String>,
}
