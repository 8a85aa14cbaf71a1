//! Run configuration

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DB_PATH};

/// SQLite journaling mode applied to the fresh database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: readers keep their snapshot while another connection commits
    #[default]
    Wal,
    /// Rollback journal: a commit needs every other reader to release its shared lock
    Delete,
}

impl JournalMode {
    /// Value passed to `PRAGMA journal_mode`
    pub fn as_pragma(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_pragma())
    }
}

/// Demonstrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Database file, deleted and recreated on every run
    pub db_path: PathBuf,

    /// Journaling mode for the fresh database
    pub journal_mode: JournalMode,

    /// How long a connection waits on a lock before giving up
    pub busy_timeout_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DemoConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database path
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Set the journal mode
    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Set the busy timeout
    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Busy timeout as a `Duration`
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
