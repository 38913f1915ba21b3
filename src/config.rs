// ABOUTME: Configuration loading and validation for the tether demo binary.
// ABOUTME: Reads TETHER_* environment variables into a typed config with defaults.

use std::path::PathBuf;

use tether_persist::{MissPolicy, WriteOrder};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TETHER_BACKEND must be one of sqlite, file, memory; got {0:?}")]
    InvalidBackend(String),

    #[error("TETHER_MISS_POLICY must be keep or write; got {0:?}")]
    InvalidMissPolicy(String),

    #[error("TETHER_WRITE_ORDER must be concurrent or sequential; got {0:?}")]
    InvalidWriteOrder(String),
}

/// Which storage the demo persists into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    File,
    Memory,
}

#[derive(Debug, Clone)]
pub struct TetherConfig {
    pub home: PathBuf,
    pub backend: Backend,
    pub miss_policy: MissPolicy,
    pub write_order: WriteOrder,
}

impl TetherConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - TETHER_HOME: data directory (default: ~/.tether)
    /// - TETHER_BACKEND: sqlite, file or memory (default: sqlite)
    /// - TETHER_MISS_POLICY: keep or write (default: keep)
    /// - TETHER_WRITE_ORDER: concurrent or sequential (default: concurrent)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let home = var("TETHER_HOME").map(PathBuf::from).unwrap_or_else(|| {
            var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".tether")
        });

        let backend = match var("TETHER_BACKEND") {
            None => Backend::Sqlite,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "sqlite" => Backend::Sqlite,
                "file" => Backend::File,
                "memory" => Backend::Memory,
                _ => return Err(ConfigError::InvalidBackend(raw)),
            },
        };

        let miss_policy = match var("TETHER_MISS_POLICY") {
            None => MissPolicy::default(),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "keep" => MissPolicy::KeepDefault,
                "write" => MissPolicy::WriteDefault,
                _ => return Err(ConfigError::InvalidMissPolicy(raw)),
            },
        };

        let write_order = match var("TETHER_WRITE_ORDER") {
            None => WriteOrder::default(),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "concurrent" => WriteOrder::Concurrent,
                "sequential" => WriteOrder::Sequential,
                _ => return Err(ConfigError::InvalidWriteOrder(raw)),
            },
        };

        Ok(Self {
            home,
            backend,
            miss_policy,
            write_order,
        })
    }

    /// SQLite database file used by the sqlite backend.
    pub fn database_path(&self) -> PathBuf {
        self.home.join("tether.db")
    }

    /// Directory used by the file backend.
    pub fn items_dir(&self) -> PathBuf {
        self.home.join("items")
    }
}
