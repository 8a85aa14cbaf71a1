//! Error types for the anomaly demonstrator
//!
//! Every failure is fatal to a run. The variants only exist so that callers can
//! tell *where* the run stopped and whether SQLite refused a step because of a
//! lock or snapshot conflict.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::demo::RunReport;
use crate::schedule::Step;

/// Extended result code SQLite returns when a WAL read transaction cannot be
/// promoted because another connection committed after its snapshot.
pub const SQLITE_BUSY_SNAPSHOT: i32 = 5 | (2 << 8);

/// Result type alias for demonstrator operations
pub type Result<T> = std::result::Result<T, AnomalyError>;

/// Main error type for the demonstrator
#[derive(Error, Debug)]
pub enum AnomalyError {
    /// The database file could not be opened or created
    #[error("Cannot open database '{}': {source}", .path.display())]
    Open {
        /// Path that was being opened
        path: PathBuf,
        /// Underlying SQLite failure
        #[source]
        source: rusqlite::Error,
    },

    /// Pragma, schema or seed statement failed
    #[error("Database setup failed ({stage}): {source}")]
    Setup {
        /// Which setup statement failed
        stage: &'static str,
        /// Underlying SQLite failure
        #[source]
        source: rusqlite::Error,
    },

    /// A read or write addressed a row that does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// The schedule is not executable as written
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// SQLite errors raised while executing a step
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO errors (console sink, cleanup)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A scheduled step failed
    #[error("{step}: {source}")]
    Step {
        /// The step that failed
        step: Step,
        /// What went wrong
        source: Box<AnomalyError>,
        /// What the run did before stopping, attached by the runner
        report: Option<Box<RunReport>>,
    },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        /// Description of the operation
        context: String,
        /// What went wrong
        source: Box<AnomalyError>,
    },
}

impl AnomalyError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Attribute an error to the scheduled step that raised it
    pub fn at_step(self, step: Step) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
            report: None,
        }
    }

    /// Attach the partial run report to a step failure
    pub fn with_report(self, report: RunReport) -> Self {
        match self {
            Self::Step { step, source, .. } => Self::Step {
                step,
                source,
                report: Some(Box::new(report)),
            },
            Self::WithContext { context, source } => Self::WithContext {
                context,
                source: Box::new(source.with_report(report)),
            },
            other => other,
        }
    }

    /// Trace, history and balances of a run that stopped at a failing step
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            Self::Step { report, .. } => report.as_deref(),
            Self::WithContext { source, .. } => source.partial_report(),
            _ => None,
        }
    }

    /// The scheduled step the run stopped at, if the failure happened mid-schedule
    pub fn failed_step(&self) -> Option<&Step> {
        match self {
            Self::Step { step, .. } => Some(step),
            Self::WithContext { source, .. } => source.failed_step(),
            _ => None,
        }
    }

    /// The innermost SQLite error, if any
    pub fn sqlite_error(&self) -> Option<&rusqlite::Error> {
        match self {
            Self::Open { source, .. } | Self::Setup { source, .. } | Self::Sqlite(source) => {
                Some(source)
            }
            Self::Step { source, .. } | Self::WithContext { source, .. } => source.sqlite_error(),
            _ => None,
        }
    }

    /// Extended SQLite result code (e.g. `SQLITE_BUSY_SNAPSHOT`), if any
    pub fn extended_code(&self) -> Option<i32> {
        match self.sqlite_error()? {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.extended_code),
            _ => None,
        }
    }

    /// True when SQLite refused the step because of another transaction:
    /// a lock it could not obtain in time, or a stale WAL snapshot.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.sqlite_error(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
        )
    }

    /// True for the WAL refusal to promote a stale read transaction to a writer
    pub fn is_snapshot_conflict(&self) -> bool {
        self.extended_code() == Some(SQLITE_BUSY_SNAPSHOT)
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Attribute a failure to a scheduled step
    fn at_step(self, step: &Step) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<AnomalyError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }

    fn at_step(self, step: &Step) -> Result<T> {
        self.map_err(|e| e.into().at_step(step.clone()))
    }
}
