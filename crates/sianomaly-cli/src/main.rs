//! sianomaly binary
//!
//! Runs the three-transaction schedule once against a fresh database file.
//! Only `R(..)=..` / `W(..)=..` lines go to stdout; logs and the fatal error,
//! if any, go to stderr.
//!
//! # Usage
//! ```bash
//! sianomaly [--db sianomaly.db] [--journal-mode wal|delete] [--busy-timeout-ms 5000] [--report FILE] [--verbose]
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use sianomaly_core::{
    DemoConfig, Demonstrator, JournalMode, RunReport, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DB_PATH,
};
use tracing_subscriber::EnvFilter;

/// Reproduce a stale-read write across three overlapping SQLite transactions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file, deleted and recreated on every run
    #[arg(long, value_name = "FILE", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Journal mode for the fresh database
    #[arg(long, value_enum, default_value_t = Mode::Wal)]
    journal_mode: Mode,

    /// Milliseconds a connection waits on a lock before SQLite reports busy
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_BUSY_TIMEOUT_MS)]
    busy_timeout_ms: u64,

    /// Write a JSON run report here; a failed run reports the steps it
    /// executed and the step that stopped it
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Write-ahead log
    Wal,
    /// Rollback journal (tx1's commit waits on tx2's shared lock)
    Delete,
}

impl From<Mode> for JournalMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Wal => JournalMode::Wal,
            Mode::Delete => JournalMode::Delete,
        }
    }
}

impl Args {
    fn config(&self) -> DemoConfig {
        DemoConfig::new()
            .with_db_path(&self.db)
            .with_journal_mode(self.journal_mode.into())
            .with_busy_timeout_ms(self.busy_timeout_ms)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

/// Write the report a run produced, complete or partial.
///
/// Returns `false` when the run failed before any step executed.
fn save_report(path: &Path, result: &sianomaly_core::Result<RunReport>) -> anyhow::Result<bool> {
    let report = match result {
        Ok(report) => report,
        Err(e) => match e.partial_report() {
            Some(report) => report,
            None => return Ok(false),
        },
    };
    std::fs::write(path, report.to_json()?)
        .with_context(|| format!("Writing report to {}", path.display()))?;
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let demo = Demonstrator::new(args.config());
    tracing::debug!("Configuration: {:?}", demo.config());
    tracing::debug!("Schedule: {}", demo.schedule());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = demo.run(&mut out);
    out.flush()?;

    let history = match &result {
        Ok(report) => Some(&report.history),
        Err(e) => e.partial_report().map(|report| &report.history),
    };
    if let Some(history) = history {
        tracing::info!("History: {}", history);
    }

    if let Some(path) = &args.report {
        if !save_report(path, &result)? {
            tracing::warn!("No report written: the run failed before its first step");
        }
    }

    result?;
    Ok(())
}
