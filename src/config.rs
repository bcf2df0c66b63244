//! Configuration management for Timekeeper
//!
//! Loads settings from TOML file at ~/.timekeeper/config.toml

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (defaults to ~/.timekeeper)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageMode,

    /// Insert demo sessions into an empty store on startup
    #[serde(default)]
    pub seed_demo: bool,

    /// Session tracker configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".timekeeper"))
        .unwrap_or_else(|| PathBuf::from(".timekeeper"))
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// SQLite database in the data directory (default)
    #[default]
    Db,
    /// In-memory only, lost on exit
    Ephemeral,
}

impl std::str::FromStr for StorageMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "db" => Ok(StorageMode::Db),
            "ephemeral" => Ok(StorageMode::Ephemeral),
            other => Err(CoreError::Config(format!("Unknown storage mode: {}", other))),
        }
    }
}

/// Session tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Seconds between polls of running applications
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Sessions shorter than this are never persisted
    #[serde(default = "default_min_session")]
    pub min_session_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_min_session() -> u64 {
    60
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn min_session(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.min_session_secs).unwrap_or(i64::MAX))
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            poll_interval_secs: default_poll_interval(),
            min_session_secs: default_min_session(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write a daily-rotated log file under `<data_dir>/logs`
    #[serde(default)]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            storage: StorageMode::default(),
            seed_demo: false,
            tracker: TrackerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_path(path.as_ref());

        if !expanded_path.exists() {
            return Err(CoreError::Config(format!(
                "Configuration file not found: {}",
                expanded_path.display()
            )));
        }

        let content = std::fs::read_to_string(&expanded_path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config)
    }

    /// Load configuration from file or use defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|p| p.join(".timekeeper").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".timekeeper/config.toml"))
    }

    /// Get the data directory, expanding ~ if present
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    /// SQLite database file inside the data directory
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("timekeeper.db")
    }

    /// Directory for rotated log files
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(data_dir) = std::env::var("TIMEKEEPER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(storage) = std::env::var("TIMEKEEPER_STORAGE") {
            self.storage = storage.parse()?;
        }
        if let Ok(seed) = std::env::var("TIMEKEEPER_SEED_DEMO") {
            self.seed_demo = seed == "true" || seed == "1";
        }
        Ok(())
    }

    /// Create a default configuration file at the given path
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        // Write a well-commented config file
        let content = r#"# Timekeeper Configuration

# Where the session database and logs live
data_dir = "~/.timekeeper"

# "db" = SQLite file in data_dir (persistent)
# "ephemeral" = in-memory only, lost on exit
storage = "db"

# Insert a week of demo sessions when the store is empty
seed_demo = false

[tracker]
# How often running applications are polled
poll_interval_secs = 10
# Sessions shorter than this are dropped instead of saved
min_session_secs = 60

[logging]
# Default level when RUST_LOG is not set
level = "info"
# Also write daily-rotated logs to <data_dir>/logs
file = false
"#;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        Ok(())
    }
}

/// Expand ~ to home directory in paths
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
