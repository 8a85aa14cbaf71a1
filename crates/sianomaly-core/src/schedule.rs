//! Scripted interleavings
//!
//! A [`Schedule`] is the exact order in which operations of several
//! transactions are issued. The runner executes it step by step on a single
//! thread; the only concurrency is that several transactions are open at once.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::{AccountKey, Balance};
use crate::error::{AnomalyError, Result};

/// Transaction number used in the schedule notation (`R2`, `W1`, `C3`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u32);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// One operation issued by a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Open the transaction (deferred: the snapshot is taken at first access)
    Begin,
    /// Read an account balance
    Read(AccountKey),
    /// Write `account = <balance this tx read for base> + delta`.
    ///
    /// The read is reused as-is and never revalidated.
    Write {
        account: AccountKey,
        base: AccountKey,
        delta: Balance,
    },
    /// Commit the transaction
    Commit,
}

/// An operation bound to the transaction that issues it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub tx: TxId,
    pub op: Op,
}

impl Step {
    pub fn new(tx: TxId, op: Op) -> Self {
        Self { tx, op }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.tx.0;
        match &self.op {
            Op::Begin => write!(f, "B{n}"),
            Op::Read(key) => write!(f, "R{n}({key})"),
            Op::Write { account, .. } => write!(f, "W{n}({account})"),
            Op::Commit => write!(f, "C{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
}

/// A validated sequence of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    steps: Vec<Step>,
}

impl Schedule {
    /// Validate and wrap a list of steps.
    ///
    /// Every transaction must begin exactly once before its first operation,
    /// issue nothing after its commit, and commit exactly once. A write's base
    /// must have been read earlier by the same transaction.
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        let mut states: HashMap<TxId, TxState> = HashMap::new();
        let mut reads: HashMap<TxId, BTreeSet<AccountKey>> = HashMap::new();

        for (i, step) in steps.iter().enumerate() {
            let invalid = |why: &str| {
                Err(AnomalyError::InvalidSchedule(format!(
                    "step {} ({}): {}",
                    i + 1,
                    step,
                    why
                )))
            };

            match (&step.op, states.get(&step.tx).copied()) {
                (Op::Begin, None) => {
                    states.insert(step.tx, TxState::Active);
                }
                (Op::Begin, Some(_)) => return invalid("transaction begun twice"),
                (_, None) => return invalid("transaction used before begin"),
                (_, Some(TxState::Committed)) => return invalid("transaction used after commit"),
                (Op::Read(key), Some(TxState::Active)) => {
                    reads.entry(step.tx).or_default().insert(*key);
                }
                (Op::Write { base, .. }, Some(TxState::Active)) => {
                    let has_read = reads.get(&step.tx).is_some_and(|r| r.contains(base));
                    if !has_read {
                        return invalid("write computed from a balance this transaction never read");
                    }
                }
                (Op::Commit, Some(TxState::Active)) => {
                    states.insert(step.tx, TxState::Committed);
                }
            }
        }

        let mut open: Vec<_> = states
            .iter()
            .filter(|(_, s)| **s == TxState::Active)
            .map(|(tx, _)| tx.to_string())
            .collect();
        if !open.is_empty() {
            open.sort();
            return Err(AnomalyError::InvalidSchedule(format!(
                "never committed: {}",
                open.join(", ")
            )));
        }

        Ok(Self { steps })
    }

    /// The three-transaction interleaving in which tx2 writes `checking` from
    /// a read taken before tx1 committed its change to `savings`:
    ///
    /// ```text
    /// R2(X0,0) R2(Y0,0) R1(Y0,0) W1(Y1,20) C1 R3(X0,0) R3(Y1,20) C3 W2(X2,-11) C2
    /// ```
    pub fn anomaly() -> Self {
        use AccountKey::{Checking, Savings};

        let (t1, t2, t3) = (TxId(1), TxId(2), TxId(3));
        let steps = vec![
            Step::new(t1, Op::Begin),
            Step::new(t2, Op::Begin),
            Step::new(t2, Op::Read(Checking)),
            Step::new(t2, Op::Read(Savings)),
            Step::new(t1, Op::Read(Savings)),
            Step::new(
                t1,
                Op::Write {
                    account: Savings,
                    base: Savings,
                    delta: 20,
                },
            ),
            Step::new(t1, Op::Commit),
            // tx3 starts only after C1, so it must see savings = 20
            Step::new(t3, Op::Begin),
            Step::new(t3, Op::Read(Checking)),
            Step::new(t3, Op::Read(Savings)),
            Step::new(t3, Op::Commit),
            Step::new(
                t2,
                Op::Write {
                    account: Checking,
                    base: Checking,
                    delta: -10 - 1,
                },
            ),
            Step::new(t2, Op::Commit),
        ];

        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Transactions in order of their `Begin`
    pub fn transactions(&self) -> Vec<TxId> {
        self.steps
            .iter()
            .filter(|s| s.op == Op::Begin)
            .map(|s| s.tx)
            .collect()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AccountKey::{Checking, Savings};

    #[test]
    fn test_anomaly_schedule_is_valid() {
        let schedule = Schedule::anomaly();
        let revalidated = Schedule::new(schedule.steps().to_vec()).expect("fixed schedule is valid");
        assert_eq!(revalidated, schedule);
        assert_eq!(schedule.transactions(), vec![TxId(1), TxId(2), TxId(3)]);
        assert_eq!(
            schedule.to_string(),
            "B1 B2 R2(checking) R2(savings) R1(savings) W1(savings) C1 \
             B3 R3(checking) R3(savings) C3 W2(checking) C2"
        );
    }

    #[test]
    fn test_commit_order_is_tx1_tx3_tx2() {
        let commits: Vec<TxId> = Schedule::anomaly()
            .steps()
            .iter()
            .filter(|s| s.op == Op::Commit)
            .map(|s| s.tx)
            .collect();
        assert_eq!(commits, vec![TxId(1), TxId(3), TxId(2)]);
    }

    #[test]
    fn test_tx3_begins_after_tx1_commits() {
        let steps = Schedule::anomaly().steps().to_vec();
        let c1 = steps.iter().position(|s| *s == Step::new(TxId(1), Op::Commit)).unwrap();
        let b3 = steps.iter().position(|s| *s == Step::new(TxId(3), Op::Begin)).unwrap();
        assert!(c1 < b3);
    }

    #[test]
    fn test_rejects_use_before_begin() {
        let err = Schedule::new(vec![Step::new(TxId(1), Op::Read(Checking))]).unwrap_err();
        assert!(err.to_string().contains("used before begin"));
    }

    #[test]
    fn test_rejects_use_after_commit() {
        let err = Schedule::new(vec![
            Step::new(TxId(1), Op::Begin),
            Step::new(TxId(1), Op::Commit),
            Step::new(TxId(1), Op::Read(Savings)),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("after commit"));
    }

    #[test]
    fn test_rejects_write_without_read() {
        let err = Schedule::new(vec![
            Step::new(TxId(1), Op::Begin),
            Step::new(
                TxId(1),
                Op::Write {
                    account: Savings,
                    base: Savings,
                    delta: 1,
                },
            ),
            Step::new(TxId(1), Op::Commit),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("never read"));
    }

    #[test]
    fn test_rejects_uncommitted_transactions() {
        let err = Schedule::new(vec![
            Step::new(TxId(2), Op::Begin),
            Step::new(TxId(1), Op::Begin),
            Step::new(TxId(1), Op::Commit),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("never committed: tx2"));
    }
}
