use crate::config::Config;
use crate::utils::single_flight::SaveGuard;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod backup_service;
pub mod grading_service;
pub mod progress_service;
pub mod submission_service;

/// Shared handle to the SQLite workspace. Callers must not hold the lock
/// across external calls (grading delegate, snapshot IO).
pub type Db = Arc<Mutex<Connection>>;

pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub grader: Arc<dyn grading_service::GradingDelegate>,
    pub saves: SaveGuard,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let grader = Arc::new(grading_service::HttpGradingDelegate::new(
            config.grader_url.clone(),
            std::time::Duration::from_secs(config.grader_timeout_secs),
        )?);
        Self::with_grader(config, grader)
    }

    pub fn with_grader(
        config: Config,
        grader: Arc<dyn grading_service::GradingDelegate>,
    ) -> anyhow::Result<Self> {
        let conn = crate::db::open_db(Path::new(&config.workspace_dir))?;
        std::fs::create_dir_all(config.backup_dir())?;

        tracing::info!("SQLite workspace opened at {}", config.workspace_dir);

        Ok(Self {
            config,
            db: Arc::new(Mutex::new(conn)),
            grader,
            saves: SaveGuard::new(),
        })
    }
}
