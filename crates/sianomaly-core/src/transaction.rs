//! Transaction handles driven by the schedule runner

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::account::{Account, AccountKey, Balance};
use crate::error::Result;
use crate::ledger::Ledger;
use crate::schedule::TxId;

/// An open SQLite transaction tagged with its schedule number.
///
/// Dropping a handle without committing rolls it back.
#[derive(Debug)]
pub struct TxHandle<'conn> {
    id: TxId,
    tx: Transaction<'conn>,
}

impl<'conn> TxHandle<'conn> {
    /// `BEGIN DEFERRED` on a dedicated connection: no lock and no snapshot
    /// until the first read or write.
    pub fn begin(id: TxId, conn: &'conn mut Connection) -> Result<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        Ok(Self { id, tx })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

impl Ledger for TxHandle<'_> {
    fn read_account(&self, key: AccountKey) -> Result<Account> {
        Ledger::read_account(&*self.tx, key)
    }

    fn write_balance(&self, key: AccountKey, balance: Balance) -> Result<()> {
        Ledger::write_balance(&*self.tx, key, balance)
    }
}
