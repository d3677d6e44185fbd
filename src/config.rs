//! Configuration loader and validator for the pass batch jobs.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

const MAX_STALE_RUN_MINUTES: u64 = 60 * 24 * 365;
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub batch: Batch,
    #[serde(default)]
    pub jobs: Jobs,
    pub notification: Notification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Launcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    /// A STARTED run older than this is treated as abandoned.
    pub stale_run_minutes: u64,
}

impl Batch {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_run_minutes.min(MAX_STALE_RUN_MINUTES) as i64)
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            stale_run_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jobs {
    #[serde(default)]
    pub expire_passes: ExpirePasses,
    #[serde(default)]
    pub add_passes: AddPasses,
    #[serde(default)]
    pub class_notifications: ClassNotifications,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpirePasses {
    pub chunk_size: usize,
}

impl Default for ExpirePasses {
    fn default() -> Self {
        Self { chunk_size: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddPasses {
    /// Bulk requests starting before `now - lookback_hours` are ignored.
    pub lookback_hours: u64,
}

impl Default for AddPasses {
    fn default() -> Self {
        Self { lookback_hours: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassNotifications {
    pub chunk_size: usize,
    /// How far ahead of class start a booking becomes due for a reminder.
    pub lead_minutes: u64,
    /// Offset from UTC used to print class times in reminder texts.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for ClassNotifications {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            lead_minutes: 10,
            utc_offset_minutes: 0,
        }
    }
}

/// Notification webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub webhook_url: String,
    pub token: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/passes.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.batch.stale_run_minutes == 0 {
        return Err(ConfigError::Invalid("batch.stale_run_minutes must be > 0"));
    }

    if cfg.jobs.expire_passes.chunk_size == 0 {
        return Err(ConfigError::Invalid("jobs.expire_passes.chunk_size must be > 0"));
    }
    if cfg.jobs.add_passes.lookback_hours == 0 {
        return Err(ConfigError::Invalid("jobs.add_passes.lookback_hours must be > 0"));
    }
    if cfg.jobs.class_notifications.chunk_size == 0 {
        return Err(ConfigError::Invalid(
            "jobs.class_notifications.chunk_size must be > 0",
        ));
    }
    if cfg.jobs.class_notifications.lead_minutes == 0 {
        return Err(ConfigError::Invalid(
            "jobs.class_notifications.lead_minutes must be > 0",
        ));
    }

    if cfg.jobs.class_notifications.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(ConfigError::Invalid(
            "jobs.class_notifications.utc_offset_minutes must be within +/-14 hours",
        ));
    }

    if cfg.notification.webhook_url.trim().is_empty() {
        return Err(ConfigError::Invalid("notification.webhook_url must be non-empty"));
    }
    if cfg.notification.token.trim().is_empty() {
        return Err(ConfigError::Invalid("notification.token must be non-empty"));
    }
    if cfg.notification.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("notification.timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML document shipped as `config.yaml`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

batch:
  stale_run_minutes: 120

jobs:
  expire_passes:
    chunk_size: 5
  add_passes:
    lookback_hours: 24
  class_notifications:
    chunk_size: 10
    lead_minutes: 10
    utc_offset_minutes: 540

notification:
  webhook_url: "https://messaging.example.com/v1/messages"
  token: "YOUR_MESSAGING_API_TOKEN"
  timeout_seconds: 10
"#
}
