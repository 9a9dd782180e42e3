pub mod assignment;
pub mod grade;
pub mod progress;
pub mod submission;

pub use assignment::{Assignment, Question, QuestionKind};
pub use grade::{DelegateScore, GradeOutcome, GradeRecord, XpAward};
pub use progress::{Phase, ProgressRecord};
pub use submission::{QuestionResponse, Submission, SubmissionContent};

/// Workflow failures handlers map onto HTTP statuses. Everything else stays
/// an `anyhow::Error` and surfaces as a 500.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Assignment not found")]
    AssignmentNotFound,
    #[error("Submission not found")]
    SubmissionNotFound,
    #[error("Maximum attempts reached")]
    MaxAttemptsReached,
    #[error("Submission already finalized")]
    AlreadyFinalized,
}
