//! sianomaly - a scripted isolation anomaly over SQLite
//!
//! Three transactions on three connections to one SQLite file, interleaved by
//! hand so that tx2 writes `checking` from a read it made before tx1 committed
//! a change to `savings`:
//!
//! ```text
//! R2(X0,0) R2(Y0,0) R1(Y0,0) W1(Y1,20) C1 R3(X0,0) R3(Y1,20) C3 W2(X2,-11) C2
//! ```
//!
//! The program takes no locks of its own. Whatever happens to the final step
//! is SQLite's decision: in WAL mode tx2's snapshot predates `C1`, so SQLite
//! refuses to promote it to a writer and reports `SQLITE_BUSY_SNAPSHOT`.
//!
//! # Quick Start
//!
//! ```no_run
//! use sianomaly_core::{DemoConfig, Demonstrator};
//!
//! let mut stdout = std::io::stdout();
//! match Demonstrator::new(DemoConfig::default()).run(&mut stdout) {
//!     Ok(report) => println!("{}", report.history),
//!     Err(e) if e.is_snapshot_conflict() => eprintln!("SQLite refused: {e}"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod account;
pub mod config;
pub mod demo;
pub mod error;
pub mod history;
pub mod ledger;
pub mod schedule;
pub mod store;
pub mod transaction;

pub use account::{Account, AccountKey, Balance};
pub use config::{DemoConfig, JournalMode};
pub use demo::{Demonstrator, RunReport, TraceLine};
pub use error::{AnomalyError, Result, ResultExt};
pub use history::{History, HistoryEvent};
pub use ledger::Ledger;
pub use schedule::{Op, Schedule, Step, TxId};
pub use store::AccountStore;
pub use transaction::TxHandle;

/// Database file used when none is configured
pub const DEFAULT_DB_PATH: &str = "sianomaly.db";

/// Lock wait before SQLite reports busy, in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
