use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::assignment::{Assignment, Question, QuestionKind};
use crate::models::grade::{GradeRecord, XpAward};
use crate::models::submission::{
    FinalizeResponse, OpenAssignmentResponse, QuestionResponse, SaveAnswerRequest,
    SaveAnswerResponse, Submission, SubmissionContent,
};
use crate::models::WorkflowError;
use crate::services::backup_service::{BackupService, BackupSnapshot};
use crate::services::grading_service::GradingService;
use crate::services::Db;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::single_flight::SaveTicket;

/// Owns the draft lifecycle: one open submission per (assignment, student),
/// upserted answers, and the finalize pipeline.
pub struct SubmissionService {
    db: Db,
    backups: BackupService,
}

impl SubmissionService {
    pub fn new(db: Db, backups: BackupService) -> Self {
        Self { db, backups }
    }

    /// Opens the assignment for a student: ensures a draft exists (or reports
    /// the terminal attempt-limit state), seeds resume state from a fresh
    /// local snapshot, then lets the authoritative server draft override it.
    pub async fn open_assignment(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<OpenAssignmentResponse> {
        let (draft, created, assignment) = self.ensure_draft(assignment_id, student_id).await?;

        let snapshot = self
            .backups
            .load_fresh_snapshot(assignment_id, student_id, Utc::now());
        let restored_from_backup = snapshot.is_some();

        let (mut answers, mut question_times, mut current_index) = match snapshot {
            Some(s) => (s.answers, s.question_times, s.current_index),
            None => (BTreeMap::new(), BTreeMap::new(), 0),
        };

        if !created {
            // A pre-existing draft is authoritative over the snapshot.
            let conn = self.db.lock().await;
            for response in load_responses(&conn, &draft.id, draft.attempt_no)? {
                answers.insert(response.question_id.clone(), response.answer);
                question_times.insert(response.question_id, response.time_spent_seconds);
            }
            current_index = draft.content.current_index;
        }

        let attempts_remaining = assignment
            .max_attempts
            .map(|max| max.saturating_sub(draft.attempt_no));

        Ok(OpenAssignmentResponse {
            submission_id: draft.id,
            attempt_no: draft.attempt_no,
            answers,
            question_times,
            current_index,
            restored_from_backup,
            attempts_remaining,
        })
    }

    /// Returns the open draft for this pair, creating one with the next
    /// attempt number if none exists. The bool is true when a new draft was
    /// created by this call.
    pub async fn ensure_draft(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<(Submission, bool, Assignment)> {
        let conn = self.db.lock().await;

        let assignment =
            find_assignment(&conn, assignment_id)?.ok_or(WorkflowError::AssignmentNotFound)?;

        if let Some(draft) = find_open_draft(&conn, assignment_id, student_id)? {
            return Ok((draft, false, assignment));
        }

        let attempt_no = next_attempt_number(&conn, assignment_id, student_id)?;
        if let Some(max) = assignment.max_attempts {
            if attempt_no > max {
                tracing::info!(
                    "Student {} exhausted {} attempts on assignment {}",
                    student_id,
                    max,
                    assignment_id
                );
                return Err(WorkflowError::MaxAttemptsReached.into());
            }
        }

        let draft = Submission {
            id: Uuid::new_v4().to_string(),
            assignment_id: assignment_id.to_string(),
            student_id: student_id.to_string(),
            attempt_no,
            submitted_at: None,
            content: SubmissionContent::default(),
            total_time_seconds: 0,
        };

        match insert_submission(&conn, &draft) {
            Ok(()) => {
                tracing::info!(
                    "Created draft {} (attempt {}) for {}/{}",
                    draft.id,
                    attempt_no,
                    assignment_id,
                    student_id
                );
                Ok((draft, true, assignment))
            }
            // Lost the open-draft race; the winner's row is authoritative.
            Err(e) if is_unique_violation(&e) => {
                let winner = find_open_draft(&conn, assignment_id, student_id)?
                    .ok_or_else(|| anyhow!("open draft vanished after unique conflict"))?;
                Ok((winner, false, assignment))
            }
            Err(e) => Err(e).context("Failed to insert draft submission"),
        }
    }

    /// Upserts one answer for the current draft, retrying transient storage
    /// failures. A persistent failure is reported in the response rather than
    /// thrown so callers can block navigation without crashing. Each
    /// successful save also persists the resume cursor onto the submission.
    pub async fn save_answer(
        &self,
        submission_id: &str,
        question_id: &str,
        req: &SaveAnswerRequest,
        ticket: &SaveTicket,
    ) -> Result<SaveAnswerResponse> {
        let (submission, existing) = {
            let conn = self.db.lock().await;
            let submission =
                find_submission(&conn, submission_id)?.ok_or(WorkflowError::SubmissionNotFound)?;
            if submission.submitted_at.is_some() {
                return Err(WorkflowError::AlreadyFinalized.into());
            }
            let existing = load_responses(&conn, submission_id, submission.attempt_no)?;
            (submission, existing)
        };

        // Mirror the new in-memory state before the authoritative write, so a
        // crash mid-save still leaves something to restore from.
        let mut snapshot = BackupSnapshot {
            answers: existing
                .iter()
                .map(|r| (r.question_id.clone(), r.answer.clone()))
                .collect(),
            question_times: existing
                .iter()
                .map(|r| (r.question_id.clone(), r.time_spent_seconds))
                .collect(),
            current_index: req.current_index,
            saved_at: Utc::now(),
        };
        snapshot
            .answers
            .insert(question_id.to_string(), req.answer.clone());
        snapshot
            .question_times
            .insert(question_id.to_string(), req.time_spent_seconds);
        if let Err(e) =
            self.backups
                .write_snapshot(&submission.assignment_id, &submission.student_id, &snapshot)
        {
            tracing::warn!(
                "Failed to mirror answers for {}/{}: {:#}",
                submission.assignment_id,
                submission.student_id,
                e
            );
        }

        let write: Result<bool> = retry_async_with_config(RetryConfig::autosave(), || async {
            // A newer save for the same question makes this one moot.
            if !ticket.is_current() {
                return Ok(false);
            }
            let conn = self.db.lock().await;
            // Re-check under the lock: a newer save may have acquired it
            // between the first check and this point, and its write must not
            // be overwritten by this one.
            if !ticket.is_current() {
                return Ok(false);
            }
            upsert_response(
                &conn,
                &submission.id,
                question_id,
                submission.attempt_no,
                &req.answer,
                req.time_spent_seconds,
            )?;
            store_cursor(&conn, &submission.id, req.current_index)?;
            Ok(true)
        })
        .await;

        match write {
            Ok(true) => Ok(SaveAnswerResponse {
                saved: true,
                superseded: false,
                error: None,
            }),
            Ok(false) => {
                tracing::debug!(
                    "Save for {}/{} superseded by a newer save",
                    submission_id,
                    question_id
                );
                Ok(SaveAnswerResponse {
                    saved: false,
                    superseded: true,
                    error: None,
                })
            }
            Err(e) => {
                tracing::error!(
                    "Autosave for {}/{} failed after retries: {:#}",
                    submission_id,
                    question_id,
                    e
                );
                Ok(SaveAnswerResponse {
                    saved: false,
                    superseded: false,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Finalize pipeline. Mandatory: grade every question, set submitted_at,
    /// write the final content blob and per-question correctness. Best-effort
    /// afterwards: grade record and XP award, whose failures are logged only.
    pub async fn finalize(
        &self,
        submission_id: &str,
        grading: &GradingService,
    ) -> Result<FinalizeResponse> {
        let (submission, questions, responses) = {
            let conn = self.db.lock().await;
            let submission =
                find_submission(&conn, submission_id)?.ok_or(WorkflowError::SubmissionNotFound)?;
            if submission.submitted_at.is_some() {
                return Err(WorkflowError::AlreadyFinalized.into());
            }
            let questions = load_questions(&conn, &submission.assignment_id)?;
            let responses = load_responses(&conn, submission_id, submission.attempt_no)?;
            (submission, questions, responses)
        };

        let answers: BTreeMap<String, String> = responses
            .iter()
            .map(|r| (r.question_id.clone(), r.answer.clone()))
            .collect();
        let question_times: BTreeMap<String, u32> = responses
            .iter()
            .map(|r| (r.question_id.clone(), r.time_spent_seconds))
            .collect();

        // Grading runs without the storage lock; questions are isolated from
        // each other's delegate failures.
        let (results, score, max_score) = grading.grade_all(&questions, &answers).await;

        let submitted_at = Utc::now();
        let total_time_seconds: u32 = question_times.values().copied().sum();
        let content = SubmissionContent {
            answers,
            question_times,
            current_index: submission.content.current_index,
            results: results.clone(),
            score: Some(score),
            max_score: Some(max_score),
        };

        {
            let conn = self.db.lock().await;

            // The pre-grade check can race a concurrent finalize of the same
            // draft; the conditional write elects a single winner.
            let updated = conn
                .execute(
                    "UPDATE submissions SET submitted_at = ?1, content = ?2, total_time_seconds = ?3
                     WHERE id = ?4 AND submitted_at IS NULL",
                    params![
                        submitted_at.to_rfc3339(),
                        serde_json::to_string(&content)?,
                        total_time_seconds,
                        submission.id,
                    ],
                )
                .context("Failed to finalize submission")?;
            if updated == 0 {
                return Err(WorkflowError::AlreadyFinalized.into());
            }

            for (question_id, outcome) in &results {
                conn.execute(
                    "UPDATE question_responses SET is_correct = ?1
                     WHERE submission_id = ?2 AND question_id = ?3 AND attempt_no = ?4",
                    params![
                        outcome.is_correct,
                        submission.id,
                        question_id,
                        submission.attempt_no
                    ],
                )
                .context("Failed to record question correctness")?;
            }

            // A submitted attempt without a grade record or XP award is an
            // accepted inconsistency, not a failed submission.
            let record = GradeRecord {
                id: Uuid::new_v4().to_string(),
                submission_id: submission.id.clone(),
                assignment_id: submission.assignment_id.clone(),
                student_id: submission.student_id.clone(),
                score,
                max_score,
                graded_at: submitted_at,
            };
            if let Err(e) = insert_grade_record(&conn, &record) {
                tracing::error!(
                    "Failed to insert grade record for submission {}: {:#}",
                    submission.id,
                    e
                );
            }

            let award = XpAward {
                id: Uuid::new_v4().to_string(),
                student_id: submission.student_id.clone(),
                assignment_id: submission.assignment_id.clone(),
                submission_id: submission.id.clone(),
                amount: score.round() as i64,
                awarded_at: submitted_at,
            };
            if let Err(e) = insert_xp_award(&conn, &award) {
                tracing::error!("Failed to award XP for submission {}: {:#}", submission.id, e);
            }
        }

        // The snapshot is invalidated only here, never on a mid-session sync.
        if let Err(e) = self
            .backups
            .delete_snapshot(&submission.assignment_id, &submission.student_id)
        {
            tracing::warn!(
                "Failed to clear answer snapshot for {}/{}: {:#}",
                submission.assignment_id,
                submission.student_id,
                e
            );
        }

        tracing::info!(
            "Submission {} finalized: {:.1}/{:.1}",
            submission.id,
            score,
            max_score
        );

        Ok(FinalizeResponse {
            submission_id: submission.id,
            attempt_no: submission.attempt_no,
            score,
            max_score,
            results,
        })
    }
}

fn find_assignment(conn: &Connection, id: &str) -> Result<Option<Assignment>> {
    conn.query_row(
        "SELECT id, subject, title, instructions, max_attempts FROM assignments WHERE id = ?",
        [id],
        |row| {
            Ok(Assignment {
                id: row.get(0)?,
                subject: row.get(1)?,
                title: row.get(2)?,
                instructions: row.get(3)?,
                max_attempts: row.get(4)?,
            })
        },
    )
    .optional()
    .context("Failed to query assignment")
}

fn load_questions(conn: &Connection, assignment_id: &str) -> Result<Vec<Question>> {
    let mut stmt = conn.prepare(
        "SELECT id, assignment_id, position, kind, prompt, points, correct_answer, tolerance, explanation
         FROM questions WHERE assignment_id = ? ORDER BY position",
    )?;
    let rows = stmt.query_map([assignment_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, u32>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, f64>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<f64>>(7)?,
            row.get::<_, Option<String>>(8)?,
        ))
    })?;

    let mut questions = Vec::new();
    for row in rows {
        let (id, assignment_id, position, kind, prompt, points, correct_answer, tolerance, explanation) =
            row?;
        let kind =
            QuestionKind::parse(&kind).ok_or_else(|| anyhow!("Unknown question kind: {}", kind))?;
        questions.push(Question {
            id,
            assignment_id,
            position,
            kind,
            prompt,
            points,
            correct_answer,
            tolerance,
            explanation,
        });
    }
    Ok(questions)
}

fn submission_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Submission, String)> {
    let submitted_at: Option<String> = row.get(4)?;
    let content_raw: String = row.get(5)?;
    Ok((
        Submission {
            id: row.get(0)?,
            assignment_id: row.get(1)?,
            student_id: row.get(2)?,
            attempt_no: row.get(3)?,
            submitted_at: submitted_at
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc)),
            content: SubmissionContent::default(),
            total_time_seconds: row.get(6)?,
        },
        content_raw,
    ))
}

const SUBMISSION_COLUMNS: &str =
    "id, assignment_id, student_id, attempt_no, submitted_at, content, total_time_seconds";

fn find_submission(conn: &Connection, id: &str) -> Result<Option<Submission>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM submissions WHERE id = ?", SUBMISSION_COLUMNS),
            [id],
            submission_from_row,
        )
        .optional()
        .context("Failed to query submission")?;
    Ok(row.map(attach_content))
}

fn find_open_draft(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
) -> Result<Option<Submission>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM submissions
                 WHERE assignment_id = ? AND student_id = ? AND submitted_at IS NULL",
                SUBMISSION_COLUMNS
            ),
            [assignment_id, student_id],
            submission_from_row,
        )
        .optional()
        .context("Failed to query open draft")?;
    Ok(row.map(attach_content))
}

fn attach_content((mut submission, raw): (Submission, String)) -> Submission {
    submission.content = serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(
            "Unreadable content blob on submission {} (reset): {}",
            submission.id,
            e
        );
        SubmissionContent::default()
    });
    submission
}

/// Next attempt number: 1 + highest finalized attempt for this pair, or 1.
fn next_attempt_number(conn: &Connection, assignment_id: &str, student_id: &str) -> Result<u32> {
    let max: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(attempt_no), 0) FROM submissions
             WHERE assignment_id = ? AND student_id = ? AND submitted_at IS NOT NULL",
            [assignment_id, student_id],
            |row| row.get(0),
        )
        .context("Failed to compute next attempt number")?;
    Ok(max + 1)
}

fn insert_submission(conn: &Connection, submission: &Submission) -> rusqlite::Result<()> {
    let content =
        serde_json::to_string(&submission.content).unwrap_or_else(|_| "{}".to_string());
    conn.execute(
        "INSERT INTO submissions(id, assignment_id, student_id, attempt_no, submitted_at, content, total_time_seconds)
         VALUES(?1, ?2, ?3, ?4, NULL, ?5, ?6)",
        params![
            submission.id,
            submission.assignment_id,
            submission.student_id,
            submission.attempt_no,
            content,
            submission.total_time_seconds,
        ],
    )?;
    Ok(())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn upsert_response(
    conn: &Connection,
    submission_id: &str,
    question_id: &str,
    attempt_no: u32,
    answer: &str,
    time_spent_seconds: u32,
) -> Result<()> {
    let envelope = serde_json::json!({ "value": answer }).to_string();
    conn.execute(
        "INSERT INTO question_responses(id, submission_id, question_id, attempt_no, answer, is_correct, time_spent_seconds)
         VALUES(?1, ?2, ?3, ?4, ?5, NULL, ?6)
         ON CONFLICT(submission_id, question_id, attempt_no) DO UPDATE SET
             answer = excluded.answer,
             is_correct = NULL,
             time_spent_seconds = excluded.time_spent_seconds",
        params![
            Uuid::new_v4().to_string(),
            submission_id,
            question_id,
            attempt_no,
            envelope,
            time_spent_seconds,
        ],
    )
    .context("Failed to upsert question response")?;
    Ok(())
}

/// Persists the resume cursor onto the submission content blob.
fn store_cursor(conn: &Connection, submission_id: &str, current_index: usize) -> Result<()> {
    let raw: String = conn
        .query_row(
            "SELECT content FROM submissions WHERE id = ?",
            [submission_id],
            |row| row.get(0),
        )
        .context("Failed to read submission content")?;

    let mut content: SubmissionContent = serde_json::from_str(&raw).unwrap_or_default();
    content.current_index = current_index;

    conn.execute(
        "UPDATE submissions SET content = ?1 WHERE id = ?2",
        params![serde_json::to_string(&content)?, submission_id],
    )
    .context("Failed to store resume cursor")?;
    Ok(())
}

fn load_responses(
    conn: &Connection,
    submission_id: &str,
    attempt_no: u32,
) -> Result<Vec<QuestionResponse>> {
    let mut stmt = conn.prepare(
        "SELECT question_id, answer, is_correct, time_spent_seconds
         FROM question_responses WHERE submission_id = ?1 AND attempt_no = ?2",
    )?;
    let rows = stmt.query_map(params![submission_id, attempt_no], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<bool>>(2)?,
            row.get::<_, u32>(3)?,
        ))
    })?;

    let mut responses = Vec::new();
    for row in rows {
        let (question_id, answer_raw, is_correct, time_spent_seconds) = row?;
        responses.push(QuestionResponse {
            submission_id: submission_id.to_string(),
            question_id,
            attempt_no,
            answer: unwrap_envelope(&answer_raw),
            is_correct,
            time_spent_seconds,
        });
    }
    Ok(responses)
}

/// Answers are stored wrapped in a `{"value": ...}` envelope; older rows may
/// hold the bare string.
fn unwrap_envelope(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => v
            .get("value")
            .and_then(|x| x.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

fn insert_grade_record(conn: &Connection, record: &GradeRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO grade_records(id, submission_id, assignment_id, student_id, score, max_score, graded_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id,
            record.submission_id,
            record.assignment_id,
            record.student_id,
            record.score,
            record.max_score,
            record.graded_at.to_rfc3339(),
        ],
    )
    .context("Failed to insert grade record")?;
    Ok(())
}

fn insert_xp_award(conn: &Connection, award: &XpAward) -> Result<()> {
    conn.execute(
        "INSERT INTO xp_awards(id, student_id, assignment_id, submission_id, amount, awarded_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            award.id,
            award.student_id,
            award.assignment_id,
            award.submission_id,
            award.amount,
            award.awarded_at.to_rfc3339(),
        ],
    )
    .context("Failed to insert XP award")?;
    Ok(())
}
