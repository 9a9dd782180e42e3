use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub workspace_dir: String,
    pub grader_url: String,
    pub grader_timeout_secs: u64,
    pub listen_addr: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            // Fallback to current directory .env for backward compatibility
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            // Load base config from TOML file
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        // Extract values with fallbacks to ENV or defaults
        let workspace_dir = settings
            .get_string("storage.workspace_dir")
            .or_else(|_| env::var("WORKSPACE_DIR"))
            .unwrap_or_else(|_| "./data".to_string());

        let grader_url = settings
            .get_string("grader.url")
            .or_else(|_| env::var("GRADER_URL"))
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let grader_timeout_secs = settings
            .get_int("grader.timeout_secs")
            .ok()
            .map(|v| v as u64)
            .or_else(|| {
                env::var("GRADER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
            })
            .unwrap_or(30);

        let listen_addr = settings
            .get_string("server.listen_addr")
            .or_else(|_| env::var("LISTEN_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8082".to_string());

        Ok(Config {
            workspace_dir,
            grader_url,
            grader_timeout_secs,
            listen_addr,
        })
    }

    /// Directory holding the per-(assignment, student) answer snapshots.
    pub fn backup_dir(&self) -> PathBuf {
        Path::new(&self.workspace_dir).join("backups")
    }
}
