use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "homeroom.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            title TEXT NOT NULL,
            instructions TEXT NOT NULL DEFAULT '',
            max_attempts INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            kind TEXT NOT NULL,
            prompt TEXT NOT NULL,
            points REAL NOT NULL,
            correct_answer TEXT NOT NULL,
            tolerance REAL,
            explanation TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            UNIQUE(assignment_id, position)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_assignment ON questions(assignment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attempt_no INTEGER NOT NULL,
            submitted_at TEXT,
            content TEXT NOT NULL DEFAULT '{}',
            total_time_seconds INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_pair ON submissions(assignment_id, student_id)",
        [],
    )?;
    // At most one open draft per (assignment, student). A lost create race
    // surfaces as a constraint violation and resolves to the winner's row.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_open_draft
            ON submissions(assignment_id, student_id) WHERE submitted_at IS NULL",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_responses(
            id TEXT PRIMARY KEY,
            submission_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            attempt_no INTEGER NOT NULL,
            answer TEXT NOT NULL,
            is_correct INTEGER,
            time_spent_seconds INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(submission_id) REFERENCES submissions(id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(submission_id, question_id, attempt_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_responses_submission
            ON question_responses(submission_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_responses_question
            ON question_responses(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_progress(
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            current_phase TEXT NOT NULL,
            completed_phases TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT,
            PRIMARY KEY(assignment_id, student_id),
            FOREIGN KEY(assignment_id) REFERENCES assignments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id TEXT PRIMARY KEY,
            submission_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            score REAL NOT NULL,
            max_score REAL NOT NULL,
            graded_at TEXT,
            FOREIGN KEY(submission_id) REFERENCES submissions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_submission ON grade_records(submission_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS xp_awards(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            submission_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            awarded_at TEXT,
            FOREIGN KEY(submission_id) REFERENCES submissions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_xp_awards_student ON xp_awards(student_id)",
        [],
    )?;

    Ok(conn)
}
