//! Minimal read/write capability over the `accounts` table
//!
//! Implemented for `rusqlite::Connection`, so a `rusqlite::Transaction` (which
//! derefs to its connection) and the setup connection share the same queries.

use rusqlite::{params, Connection, OptionalExtension};

use crate::account::{Account, AccountKey, Balance};
use crate::error::{AnomalyError, Result};

/// Read and overwrite account balances
pub trait Ledger {
    /// Read one account row; a missing row is an error
    fn read_account(&self, key: AccountKey) -> Result<Account>;

    /// Overwrite one account's balance; a missing row is an error
    fn write_balance(&self, key: AccountKey, balance: Balance) -> Result<()>;
}

impl Ledger for Connection {
    fn read_account(&self, key: AccountKey) -> Result<Account> {
        let mut stmt =
            self.prepare_cached("SELECT name, balance FROM accounts WHERE name = ?1")?;
        let account = stmt
            .query_row(params![key.as_str()], |row| {
                Ok(Account {
                    name: row.get(0)?,
                    balance: row.get(1)?,
                })
            })
            .optional()?;

        account.ok_or_else(|| AnomalyError::AccountNotFound(key.to_string()))
    }

    fn write_balance(&self, key: AccountKey, balance: Balance) -> Result<()> {
        let mut stmt =
            self.prepare_cached("UPDATE accounts SET balance = ?1 WHERE name = ?2")?;
        let changed = stmt.execute(params![balance, key.as_str()])?;
        if changed == 0 {
            return Err(AnomalyError::AccountNotFound(key.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger() -> Connection {
        let conn = Connection::open(":memory:").expect("in-memory SQLite should open");
        conn.execute_batch(
            "CREATE TABLE accounts (name TEXT PRIMARY KEY NOT NULL, balance INTEGER NOT NULL);
             INSERT INTO accounts VALUES ('checking', 0);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_read_and_write() {
        let conn = temp_ledger();
        conn.write_balance(AccountKey::Checking, -11).unwrap();

        let acc = conn.read_account(AccountKey::Checking).unwrap();
        assert_eq!(acc.name, "checking");
        assert_eq!(acc.balance, -11);
    }

    #[test]
    fn test_missing_row_is_an_error() {
        let conn = temp_ledger();

        let err = conn.read_account(AccountKey::Savings).unwrap_err();
        assert!(matches!(err, AnomalyError::AccountNotFound(ref n) if n == "savings"));

        let err = conn.write_balance(AccountKey::Savings, 20).unwrap_err();
        assert!(matches!(err, AnomalyError::AccountNotFound(_)));
    }

    #[test]
    fn test_through_transaction() {
        let mut conn = temp_ledger();
        let tx = conn.transaction().unwrap();
        tx.write_balance(AccountKey::Checking, 7).unwrap();
        assert_eq!(tx.read_account(AccountKey::Checking).unwrap().balance, 7);
        tx.commit().unwrap();

        assert_eq!(conn.read_account(AccountKey::Checking).unwrap().balance, 7);
    }
}
