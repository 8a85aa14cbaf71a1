//! Anomaly demonstrator
//!
//! Resets the database, seeds it and drives a [`Schedule`] one step at a time,
//! each transaction on its own connection. Every read prints `R(name)=balance`
//! and every write prints `W(name)=balance` to the given sink as soon as it
//! succeeds. The first failing step ends the run.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::account::{AccountKey, Balance};
use crate::config::{DemoConfig, JournalMode};
use crate::error::{AnomalyError, Result, ResultExt};
use crate::history::History;
use crate::ledger::Ledger;
use crate::schedule::{Op, Schedule, Step, TxId};
use crate::store::AccountStore;
use crate::transaction::TxHandle;

/// One console line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TraceLine {
    Read { name: String, balance: Balance },
    Write { name: String, balance: Balance },
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { name, balance } => write!(f, "R({name})={balance}"),
            Self::Write { name, balance } => write!(f, "W({name})={balance}"),
        }
    }
}

/// What a run executed. Returned on success; attached to the error when a
/// step fails (see [`AnomalyError::partial_report`]).
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub journal_mode: JournalMode,
    pub trace: Vec<TraceLine>,
    pub history: History,
    /// Committed balances once every transaction has ended
    pub balances: BTreeMap<String, Balance>,
    /// Step the run stopped at, if any
    pub failed_step: Option<Step>,
    /// Description of the failure, if any
    pub error: Option<String>,
}

impl RunReport {
    /// Serialize the report as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs a schedule against a freshly created database
#[derive(Debug, Clone)]
pub struct Demonstrator {
    config: DemoConfig,
    schedule: Schedule,
}

impl Demonstrator {
    /// Demonstrator for the three-transaction anomaly schedule
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            schedule: Schedule::anomaly(),
        }
    }

    /// Replace the schedule to run
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn config(&self) -> &DemoConfig {
        &self.config
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Execute the schedule, writing one line per read and write to `out`.
    ///
    /// Lines for steps that succeeded are already written when an error is
    /// returned, and a failing step's error carries the partial [`RunReport`].
    /// Nothing is written if the database cannot be set up.
    pub fn run<W: Write>(&self, out: &mut W) -> Result<RunReport> {
        let store = AccountStore::create(&self.config)?;

        let txs = self.schedule.transactions();
        let mut conns = txs
            .iter()
            .map(|tx| {
                store
                    .connect()
                    .with_context(|| format!("Opening connection for {tx}"))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Running {} against {}", self.schedule, store.path().display());
        let mut exec = Execution::new(txs.iter().copied().zip(conns.iter_mut()), out);
        let failure = self.schedule.steps().iter().find_map(|step| {
            debug!("Executing {}", step);
            exec.apply(step).at_step(step).err()
        });

        let trace = std::mem::take(&mut exec.trace);
        let history = std::mem::take(&mut exec.history);
        // rolls back whatever is still open, releasing its locks
        drop(exec);

        let balances = match (store.balances(), &failure) {
            (Ok(balances), _) => balances,
            (Err(e), Some(_)) => {
                warn!("Could not read balances after failed run: {}", e);
                BTreeMap::new()
            }
            (Err(e), None) => return Err(e.context("Reading final balances")),
        };

        let report = RunReport {
            journal_mode: store.journal_mode(),
            trace,
            history,
            balances,
            failed_step: failure.as_ref().and_then(|e| e.failed_step().cloned()),
            error: failure.as_ref().map(|e| e.to_string()),
        };

        match failure {
            None => {
                info!("Schedule complete: {}", report.history);
                Ok(report)
            }
            Some(e) => {
                warn!("Schedule stopped at {}: {}", e, report.history);
                Err(e.with_report(report))
            }
        }
    }
}

/// Per-run state: idle connections, open transactions and the reads each
/// transaction has made so far.
struct Execution<'c, W> {
    idle: HashMap<TxId, &'c mut Connection>,
    active: HashMap<TxId, TxHandle<'c>>,
    reads: HashMap<(TxId, AccountKey), Balance>,
    history: History,
    trace: Vec<TraceLine>,
    out: &'c mut W,
}

impl<'c, W: Write> Execution<'c, W> {
    fn new(conns: impl IntoIterator<Item = (TxId, &'c mut Connection)>, out: &'c mut W) -> Self {
        Self {
            idle: conns.into_iter().collect(),
            active: HashMap::new(),
            reads: HashMap::new(),
            history: History::new(),
            trace: Vec::new(),
            out,
        }
    }

    fn handle(&self, tx: TxId) -> Result<&TxHandle<'c>> {
        self.active
            .get(&tx)
            .ok_or_else(|| AnomalyError::InvalidSchedule(format!("{tx} is not active")))
    }

    fn emit(&mut self, line: TraceLine) -> Result<()> {
        writeln!(self.out, "{line}")?;
        self.trace.push(line);
        Ok(())
    }

    fn apply(&mut self, step: &Step) -> Result<()> {
        let tx = step.tx;
        match &step.op {
            Op::Begin => {
                let conn = self.idle.remove(&tx).ok_or_else(|| {
                    AnomalyError::InvalidSchedule(format!("{tx} has no free connection"))
                })?;
                let handle = TxHandle::begin(tx, conn)?;
                self.active.insert(tx, handle);
            }
            Op::Read(key) => {
                let account = self.handle(tx)?.read_account(*key)?;
                self.reads.insert((tx, *key), account.balance);
                self.history.read(tx, *key, account.balance);
                self.emit(TraceLine::Read {
                    name: account.name,
                    balance: account.balance,
                })?;
            }
            Op::Write {
                account,
                base,
                delta,
            } => {
                // deliberately the value read earlier, not a fresh one
                let read = self.reads.get(&(tx, *base)).copied().ok_or_else(|| {
                    AnomalyError::InvalidSchedule(format!("{tx} never read {base}"))
                })?;
                let balance = read + delta;
                self.handle(tx)?.write_balance(*account, balance)?;
                self.history.write(tx, *account, balance);
                self.emit(TraceLine::Write {
                    name: account.to_string(),
                    balance,
                })?;
            }
            Op::Commit => {
                let handle = self
                    .active
                    .remove(&tx)
                    .ok_or_else(|| AnomalyError::InvalidSchedule(format!("{tx} is not active")))?;
                handle.commit()?;
                self.history.commit(tx);
                info!("{} committed", tx);
            }
        }
        Ok(())
    }
}
