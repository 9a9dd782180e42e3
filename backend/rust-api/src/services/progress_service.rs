use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::progress::{Phase, ProgressRecord};
use crate::models::WorkflowError;
use crate::services::Db;

/// Tracks the student's position in the fixed five-step workflow.
/// Transitions are upserts keyed by (assignment, student): last write wins,
/// no conflict detection.
pub struct ProgressService {
    db: Db,
}

impl ProgressService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Returns the progress record, creating one at the first phase if this
    /// student has never opened the assignment.
    pub async fn load_or_init(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<ProgressRecord> {
        let conn = self.db.lock().await;

        if !assignment_exists(&conn, assignment_id)? {
            return Err(WorkflowError::AssignmentNotFound.into());
        }

        if let Some(record) = find_record(&conn, assignment_id, student_id)? {
            return Ok(record);
        }

        let record = ProgressRecord::new(assignment_id, student_id);
        upsert_record(&conn, &record).context("Failed to create progress record")?;

        tracing::info!(
            "Initialized progress for {}/{} at phase {}",
            assignment_id,
            student_id,
            record.current_phase.as_str()
        );

        Ok(record)
    }

    /// Moves to `to`, idempotently marking the phase being left as complete
    /// when asked. A failed persist is logged and swallowed: the returned
    /// record still advances, and the next load re-syncs from storage.
    pub async fn advance(
        &self,
        assignment_id: &str,
        student_id: &str,
        to: Phase,
        mark_prior_complete: bool,
    ) -> Result<ProgressRecord> {
        let conn = self.db.lock().await;
        let mut record = find_record(&conn, assignment_id, student_id)?
            .unwrap_or_else(|| ProgressRecord::new(assignment_id, student_id));

        if mark_prior_complete {
            let leaving = record.current_phase;
            if !record.completed_phases.contains(&leaving) {
                record.completed_phases.push(leaving);
            }
        }
        record.current_phase = to;
        record.updated_at = Utc::now();

        if let Err(e) = upsert_record(&conn, &record) {
            tracing::warn!(
                "Failed to persist phase transition for {}/{}: {:#}",
                assignment_id,
                student_id,
                e
            );
        }

        Ok(record)
    }

    /// Free navigation: changes phase with no completion side effects.
    pub async fn jump(
        &self,
        assignment_id: &str,
        student_id: &str,
        to: Phase,
    ) -> Result<ProgressRecord> {
        let conn = self.db.lock().await;
        let mut record = find_record(&conn, assignment_id, student_id)?
            .unwrap_or_else(|| ProgressRecord::new(assignment_id, student_id));

        record.current_phase = to;
        record.updated_at = Utc::now();

        if let Err(e) = upsert_record(&conn, &record) {
            tracing::warn!(
                "Failed to persist phase jump for {}/{}: {:#}",
                assignment_id,
                student_id,
                e
            );
        }

        Ok(record)
    }
}

fn assignment_exists(conn: &Connection, assignment_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM assignments WHERE id = ?",
            [assignment_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query assignment")?;
    Ok(found.is_some())
}

fn find_record(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
) -> Result<Option<ProgressRecord>> {
    let row = conn
        .query_row(
            "SELECT current_phase, completed_phases, updated_at
             FROM assignment_progress WHERE assignment_id = ? AND student_id = ?",
            [assignment_id, student_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()
        .context("Failed to query progress record")?;

    let Some((phase, completed, updated_at)) = row else {
        return Ok(None);
    };

    let current_phase = Phase::parse(&phase)
        .ok_or_else(|| anyhow::anyhow!("Unknown phase in progress record: {}", phase))?;
    let completed_phases: Vec<Phase> = serde_json::from_str(&completed).unwrap_or_default();
    let updated_at = updated_at
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(Some(ProgressRecord {
        assignment_id: assignment_id.to_string(),
        student_id: student_id.to_string(),
        current_phase,
        completed_phases,
        updated_at,
    }))
}

fn upsert_record(conn: &Connection, record: &ProgressRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO assignment_progress(assignment_id, student_id, current_phase, completed_phases, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(assignment_id, student_id) DO UPDATE SET
             current_phase = excluded.current_phase,
             completed_phases = excluded.completed_phases,
             updated_at = excluded.updated_at",
        params![
            record.assignment_id,
            record.student_id,
            record.current_phase.as_str(),
            serde_json::to_string(&record.completed_phases)?,
            record.updated_at.to_rfc3339(),
        ],
    )
    .context("Failed to upsert progress record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::sync::Mutex;

    fn test_db() -> Db {
        let workspace = std::env::temp_dir().join(format!(
            "homeroom-progress-test-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let conn = crate::db::open_db(&workspace).expect("open test db");
        conn.execute(
            "INSERT INTO assignments(id, subject, title, instructions, max_attempts)
             VALUES('a1', 'science', 'Plants', '', NULL)",
            [],
        )
        .expect("seed assignment");
        Arc::new(Mutex::new(conn))
    }

    #[tokio::test]
    async fn load_initializes_at_first_phase() {
        let service = ProgressService::new(test_db());
        let record = service.load_or_init("a1", "s1").await.expect("load");
        assert_eq!(record.current_phase, Phase::Research);
        assert!(record.completed_phases.is_empty());
    }

    #[tokio::test]
    async fn advance_marks_left_phase_complete_idempotently() {
        let service = ProgressService::new(test_db());
        service.load_or_init("a1", "s1").await.expect("init");

        let record = service
            .advance("a1", "s1", Phase::Notes, true)
            .await
            .expect("advance");
        assert_eq!(record.current_phase, Phase::Notes);
        assert_eq!(record.completed_phases, vec![Phase::Research]);

        // going back and advancing again must not duplicate the entry
        service
            .advance("a1", "s1", Phase::Research, false)
            .await
            .expect("back");
        let record = service
            .advance("a1", "s1", Phase::Notes, true)
            .await
            .expect("advance again");
        assert_eq!(record.completed_phases, vec![Phase::Research]);
    }

    #[tokio::test]
    async fn jump_has_no_completion_side_effects() {
        let service = ProgressService::new(test_db());
        service.load_or_init("a1", "s1").await.expect("init");

        let record = service
            .jump("a1", "s1", Phase::Assessment)
            .await
            .expect("jump");
        assert_eq!(record.current_phase, Phase::Assessment);
        assert!(record.completed_phases.is_empty());

        // transition survives a reload
        let record = service.load_or_init("a1", "s1").await.expect("reload");
        assert_eq!(record.current_phase, Phase::Assessment);
    }

    #[tokio::test]
    async fn unknown_assignment_is_rejected() {
        let service = ProgressService::new(test_db());
        let err = service.load_or_init("missing", "s1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::AssignmentNotFound)
        ));
    }
}
