//! Schedule history in `R/W/C` notation with version subscripts
//!
//! `R2(X0,0)` reads: transaction 2 read item X in the version installed by
//! transaction 0 (the seed) and saw value 0. Versions follow snapshot rules:
//! a transaction sees its own writes, otherwise the latest version committed
//! before its snapshot, which is fixed at its first read or write (SQLite WAL
//! deferred transactions behave this way).

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::account::{AccountKey, Balance};
use crate::schedule::TxId;

/// Version installed by the seed rows
pub const INITIAL_VERSION: TxId = TxId(0);

/// One recorded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HistoryEvent {
    Read {
        tx: TxId,
        account: AccountKey,
        version: TxId,
        value: Balance,
    },
    Write {
        tx: TxId,
        account: AccountKey,
        value: Balance,
    },
    Commit {
        tx: TxId,
    },
}

impl fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read {
                tx,
                account,
                version,
                value,
            } => write!(f, "R{}({}{},{})", tx.0, account.symbol(), version.0, value),
            // a write installs the writer's own version
            Self::Write { tx, account, value } => {
                write!(f, "W{}({}{},{})", tx.0, account.symbol(), tx.0, value)
            }
            Self::Commit { tx } => write!(f, "C{}", tx.0),
        }
    }
}

/// Recorder for the executed part of a schedule
#[derive(Debug, Default, Clone, Serialize)]
pub struct History {
    events: Vec<HistoryEvent>,
    #[serde(skip)]
    committed: Vec<(TxId, Vec<AccountKey>)>,
    #[serde(skip)]
    snapshots: HashMap<TxId, usize>,
    #[serde(skip)]
    pending: HashMap<TxId, BTreeMap<AccountKey, Balance>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    fn touch(&mut self, tx: TxId) {
        let seen = self.committed.len();
        self.snapshots.entry(tx).or_insert(seen);
    }

    /// Version of `account` visible to `tx`
    pub fn visible_version(&self, tx: TxId, account: AccountKey) -> TxId {
        if self
            .pending
            .get(&tx)
            .is_some_and(|w| w.contains_key(&account))
        {
            return tx;
        }
        let snapshot = self
            .snapshots
            .get(&tx)
            .copied()
            .unwrap_or(self.committed.len());
        self.committed[..snapshot]
            .iter()
            .rev()
            .find(|(_, keys)| keys.contains(&account))
            .map(|(writer, _)| *writer)
            .unwrap_or(INITIAL_VERSION)
    }

    pub fn read(&mut self, tx: TxId, account: AccountKey, value: Balance) {
        self.touch(tx);
        let version = self.visible_version(tx, account);
        self.events.push(HistoryEvent::Read {
            tx,
            account,
            version,
            value,
        });
    }

    pub fn write(&mut self, tx: TxId, account: AccountKey, value: Balance) {
        self.touch(tx);
        self.pending.entry(tx).or_default().insert(account, value);
        self.events.push(HistoryEvent::Write { tx, account, value });
    }

    pub fn commit(&mut self, tx: TxId) {
        let written = self
            .pending
            .remove(&tx)
            .map(|w| w.into_keys().collect())
            .unwrap_or_default();
        self.committed.push((tx, written));
        self.snapshots.remove(&tx);
        self.events.push(HistoryEvent::Commit { tx });
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{event}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AccountKey::{Checking, Savings};

    #[test]
    fn test_anomaly_notation() {
        let (t1, t2, t3) = (TxId(1), TxId(2), TxId(3));
        let mut h = History::new();
        h.read(t2, Checking, 0);
        h.read(t2, Savings, 0);
        h.read(t1, Savings, 0);
        h.write(t1, Savings, 20);
        h.commit(t1);
        h.read(t3, Checking, 0);
        h.read(t3, Savings, 20);
        h.commit(t3);
        h.write(t2, Checking, -11);
        h.commit(t2);

        assert_eq!(
            h.to_string(),
            "R2(X0,0) R2(Y0,0) R1(Y0,0) W1(Y1,20) C1 R3(X0,0) R3(Y1,20) C3 W2(X2,-11) C2"
        );
    }

    #[test]
    fn test_old_snapshot_keeps_old_version() {
        let (t1, t2) = (TxId(1), TxId(2));
        let mut h = History::new();
        h.read(t2, Checking, 0);
        h.read(t1, Savings, 0);
        h.write(t1, Savings, 20);
        h.commit(t1);

        // tx2's snapshot predates C1
        assert_eq!(h.visible_version(t2, Savings), INITIAL_VERSION);
        assert_eq!(h.visible_version(TxId(3), Savings), t1);
    }

    #[test]
    fn test_own_write_is_visible() {
        let mut h = History::new();
        h.write(TxId(4), Checking, 5);
        assert_eq!(h.visible_version(TxId(4), Checking), TxId(4));
        h.read(TxId(4), Checking, 5);
        assert_eq!(h.events().last().unwrap().to_string(), "R4(X4,5)");
    }

    #[test]
    fn test_serializes_events_only() {
        let mut h = History::new();
        h.read(TxId(1), Savings, 0);
        h.commit(TxId(1));

        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["events"][0]["kind"], "read");
        assert_eq!(json["events"][0]["account"], "savings");
        assert_eq!(json["events"][1]["kind"], "commit");
        assert!(json.get("committed").is_none());
    }
}
