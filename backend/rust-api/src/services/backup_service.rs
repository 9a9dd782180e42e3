use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Snapshots older than this at read time are silently ignored.
pub const FRESHNESS_WINDOW_SECS: i64 = 3600;

/// Durable mirror of in-memory answer state, written on every change and
/// consulted only at load time. Deleted only on successful finalize; an
/// abandoned draft leaves a stale snapshot behind that ages out of trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub answers: BTreeMap<String, String>,
    pub question_times: BTreeMap<String, u32>,
    pub current_index: usize,
    pub saved_at: DateTime<Utc>,
}

pub fn is_fresh(saved_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(saved_at) <= Duration::seconds(FRESHNESS_WINDOW_SECS)
}

pub struct BackupService {
    dir: PathBuf,
}

impl BackupService {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn snapshot_path(&self, assignment_id: &str, student_id: &str) -> PathBuf {
        self.dir
            .join(format!("assignment_backup_{}_{}.json", assignment_id, student_id))
    }

    pub fn write_snapshot(
        &self,
        assignment_id: &str,
        student_id: &str,
        snapshot: &BackupSnapshot,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create backup directory {}", self.dir.display())
        })?;

        let path = self.snapshot_path(assignment_id, student_id);
        let tmp = path.with_extension("json.writing");
        let body = serde_json::to_string(snapshot).context("failed to serialize snapshot")?;
        fs::write(&tmp, body)
            .with_context(|| format!("failed to write snapshot {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move snapshot into place {}", path.display()))?;

        Ok(())
    }

    /// Returns the snapshot for this (assignment, student) only if it is
    /// within the freshness window. Unreadable snapshots are discarded.
    pub fn load_fresh_snapshot(
        &self,
        assignment_id: &str,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> Option<BackupSnapshot> {
        let path = self.snapshot_path(assignment_id, student_id);
        let raw = fs::read_to_string(&path).ok()?;

        let snapshot: BackupSnapshot = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Discarding unreadable snapshot {}: {}", path.display(), e);
                return None;
            }
        };

        if is_fresh(snapshot.saved_at, now) {
            Some(snapshot)
        } else {
            tracing::debug!(
                "Snapshot {} is older than the freshness window; ignored",
                path.display()
            );
            None
        }
    }

    pub fn delete_snapshot(&self, assignment_id: &str, student_id: &str) -> Result<()> {
        let path = self.snapshot_path(assignment_id, student_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to delete snapshot {}", path.display()))
            }
        }
    }
}
