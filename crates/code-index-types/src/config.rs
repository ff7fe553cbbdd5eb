//! Configuration loading for code-index.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `<config dir>/code-index/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::CodeIndexError;

/// How queued tasks are buffered between producers and the consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// In-memory bounded channel; pending tasks are lost on exit
    Channel,
    /// Channel backed by a journal in the metadata store; pending tasks
    /// are replayed on the next start
    #[default]
    Persistent,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::Channel => write!(f, "channel"),
            QueueKind::Persistent => write!(f, "persistent"),
        }
    }
}

/// Work queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub kind: QueueKind,

    /// Capacity of the in-memory buffer; producers wait when it is full
    #[serde(default = "default_queue_length")]
    pub length: usize,

    /// Maximum tasks handed to the consumer at once
    #[serde(default = "default_batch_length")]
    pub batch_length: usize,
}

fn default_queue_length() -> usize {
    20
}

fn default_batch_length() -> usize {
    20
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            kind: QueueKind::default(),
            length: default_queue_length(),
            batch_length: default_batch_length(),
        }
    }
}

impl QueueSettings {
    pub fn with_kind(mut self, kind: QueueKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_batch_length(mut self, batch_length: usize) -> Self {
        self.batch_length = batch_length;
        self
    }
}

/// Code indexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSettings {
    /// Code indexing is opt-in
    #[serde(default)]
    pub repo_indexer_enabled: bool,

    /// Name of the search backend in the backend registry
    #[serde(default = "default_repo_type")]
    pub repo_type: String,

    /// Directory holding the search backend's files
    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    /// Maximum time to open the backend; 0 waits forever
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Files larger than this many bytes are not indexed
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Repository ids fetched per backfill page
    #[serde(default = "default_backfill_page_size")]
    pub backfill_page_size: usize,

    #[serde(default)]
    pub queue: QueueSettings,
}

fn default_repo_type() -> String {
    "tantivy".to_string()
}

fn default_repo_path() -> String {
    data_dir_path("repos.index")
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_backfill_page_size() -> usize {
    50
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            repo_indexer_enabled: false,
            repo_type: default_repo_type(),
            repo_path: default_repo_path(),
            startup_timeout_secs: default_startup_timeout(),
            max_file_size: default_max_file_size(),
            backfill_page_size: default_backfill_page_size(),
            queue: QueueSettings::default(),
        }
    }
}

impl IndexerSettings {
    /// Startup timeout, or `None` when disabled.
    pub fn startup_timeout(&self) -> Option<Duration> {
        if self.startup_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.startup_timeout_secs))
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.repo_type.trim().is_empty() {
            return Err("repo_type must not be empty".to_string());
        }
        if self.backfill_page_size == 0 {
            return Err("backfill_page_size must be > 0".to_string());
        }
        if self.queue.length == 0 {
            return Err("queue.length must be > 0".to_string());
        }
        if self.queue.batch_length == 0 {
            return Err("queue.batch_length must be > 0".to_string());
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB metadata store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub indexer: IndexerSettings,
}

fn data_dir_path(leaf: &str) -> String {
    ProjectDirs::from("", "", "code-index")
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(".").join(leaf))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir_path("db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            indexer: IndexerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (`<config dir>/code-index/config.toml`)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (`CODE_INDEX_*`, nested keys joined by `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, CodeIndexError> {
        let config_dir = ProjectDirs::from("", "", "code-index")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");
        let defaults = IndexerSettings::default();

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| CodeIndexError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| CodeIndexError::Config(e.to_string()))?
            .set_default("indexer.repo_indexer_enabled", defaults.repo_indexer_enabled)
            .map_err(|e| CodeIndexError::Config(e.to_string()))?
            .set_default("indexer.repo_type", defaults.repo_type)
            .map_err(|e| CodeIndexError::Config(e.to_string()))?
            .set_default("indexer.repo_path", defaults.repo_path)
            .map_err(|e| CodeIndexError::Config(e.to_string()))?
            .set_default(
                "indexer.startup_timeout_secs",
                defaults.startup_timeout_secs as i64,
            )
            .map_err(|e| CodeIndexError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // CODE_INDEX_LOG_LEVEL, CODE_INDEX_INDEXER__REPO_INDEXER_ENABLED, ...
        builder = builder.add_source(
            Environment::with_prefix("CODE_INDEX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| CodeIndexError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| CodeIndexError::Config(e.to_string()))?;

        settings
            .indexer
            .validate()
            .map_err(CodeIndexError::Config)?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert!(!settings.indexer.repo_indexer_enabled);
        assert_eq!(settings.indexer.repo_type, "tantivy");
        assert_eq!(settings.indexer.startup_timeout_secs, 30);
        assert_eq!(settings.indexer.backfill_page_size, 50);
        assert_eq!(settings.indexer.queue.kind, QueueKind::Persistent);
        assert_eq!(settings.indexer.queue.length, 20);
        assert_eq!(settings.indexer.queue.batch_length, 20);
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.indexer.repo_type, "tantivy");
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\n[indexer]\nrepo_indexer_enabled = true\nstartup_timeout_secs = 5\n\n[indexer.queue]\nkind = \"channel\"\nbatch_length = 4\n"
        )
        .unwrap();
        drop(file);

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert!(settings.indexer.repo_indexer_enabled);
        assert_eq!(settings.indexer.startup_timeout_secs, 5);
        assert_eq!(settings.indexer.queue.kind, QueueKind::Channel);
        assert_eq!(settings.indexer.queue.batch_length, 4);
        assert_eq!(settings.indexer.queue.length, 20);
    }

    #[test]
    fn test_startup_timeout() {
        let mut settings = IndexerSettings::default();
        assert_eq!(settings.startup_timeout(), Some(Duration::from_secs(30)));
        settings.startup_timeout_secs = 0;
        assert_eq!(settings.startup_timeout(), None);
    }

    #[test]
    fn test_validation() {
        let mut settings = IndexerSettings::default();
        assert!(settings.validate().is_ok());

        settings.backfill_page_size = 0;
        assert!(settings.validate().is_err());

        settings.backfill_page_size = 50;
        settings.queue.batch_length = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_queue_kind_serde() {
        let kind: QueueKind = serde_json::from_str("\"channel\"").unwrap();
        assert_eq!(kind, QueueKind::Channel);
        assert_eq!(QueueKind::Persistent.to_string(), "persistent");
    }
}
