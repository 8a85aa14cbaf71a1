//! AccountStore: the SQLite file the scenario runs against
//!
//! Owns the database lifecycle:
//! - reset: the file and its WAL companions are removed before every run
//! - open: journal mode and busy timeout are applied to every connection
//! - migrate/seed: one `accounts` table with two zero-balance rows
//! - connect: one extra connection per scripted transaction, since SQLite
//!   allows a single open transaction per connection

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::account::{AccountKey, Balance};
use crate::config::{DemoConfig, JournalMode};
use crate::error::{AnomalyError, Result};

/// Handle on the demonstration database
#[derive(Debug)]
pub struct AccountStore {
    conn: Connection,
    config: DemoConfig,
}

impl AccountStore {
    /// Remove the database file and its `-wal`/`-shm` companions.
    ///
    /// Failures are logged and otherwise ignored: a missing file is the normal
    /// case, and anything else will surface when the file is reopened.
    pub fn reset(path: impl AsRef<Path>) {
        let path = path.as_ref();
        for file in companion_files(path) {
            match std::fs::remove_file(&file) {
                Ok(()) => debug!("Removed {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", file.display(), e),
            }
        }
    }

    /// Reset the database file, then create the schema and seed rows.
    ///
    /// Fails before any row is written if the file cannot be created.
    pub fn create(config: &DemoConfig) -> Result<Self> {
        Self::reset(&config.db_path);

        let conn = open_connection(config)?;
        let mode: String = conn
            .query_row(
                &format!("PRAGMA journal_mode = {}", config.journal_mode.as_pragma()),
                [],
                |row| row.get(0),
            )
            .map_err(|source| AnomalyError::Setup {
                stage: "journal_mode pragma",
                source,
            })?;
        if !mode.eq_ignore_ascii_case(config.journal_mode.as_pragma()) {
            warn!(
                "Requested journal_mode={} but SQLite reports {}",
                config.journal_mode, mode
            );
        }

        let store = Self {
            conn,
            config: config.clone(),
        };
        store.migrate()?;
        store.seed()?;
        info!(
            "Database {} ready (journal_mode={})",
            config.db_path.display(),
            mode
        );
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE accounts (
                    name    TEXT PRIMARY KEY NOT NULL,
                    balance INTEGER NOT NULL
                );",
            )
            .map_err(|source| AnomalyError::Setup {
                stage: "create accounts table",
                source,
            })
    }

    fn seed(&self) -> Result<()> {
        for key in AccountKey::ALL {
            self.conn
                .execute(
                    "INSERT INTO accounts (name, balance) VALUES (?1, ?2)",
                    params![key.as_str(), 0_i64],
                )
                .map_err(|source| AnomalyError::Setup {
                    stage: "seed accounts",
                    source,
                })?;
        }
        Ok(())
    }

    /// Open another connection to the same file with the same settings
    pub fn connect(&self) -> Result<Connection> {
        open_connection(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config.db_path
    }

    pub fn journal_mode(&self) -> JournalMode {
        self.config.journal_mode
    }

    /// Current committed balances, keyed by account name
    pub fn balances(&self) -> Result<BTreeMap<String, Balance>> {
        load_balances(&self.conn)
    }

    /// Reopen an existing database (never creating one) and read its balances
    pub fn read_balances(path: impl AsRef<Path>) -> Result<BTreeMap<String, Balance>> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|source| AnomalyError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        load_balances(&conn)
    }
}

fn open_connection(config: &DemoConfig) -> Result<Connection> {
    let path = &config.db_path;
    let conn = Connection::open(path).map_err(|source| AnomalyError::Open {
        path: path.clone(),
        source,
    })?;
    conn.busy_timeout(config.busy_timeout())
        .map_err(|source| AnomalyError::Setup {
            stage: "busy_timeout",
            source,
        })?;
    Ok(conn)
}

fn load_balances(conn: &Connection) -> Result<BTreeMap<String, Balance>> {
    let mut stmt = conn.prepare("SELECT name, balance FROM accounts ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Balance>(1)?))
    })?;

    let balances = rows.collect::<rusqlite::Result<BTreeMap<String, Balance>>>()?;
    Ok(balances)
}

fn companion_files(path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}
