//! Accounts seeded by the demonstrator

use std::fmt;

use serde::{Deserialize, Serialize};

/// Account balance in whole units
pub type Balance = i64;

/// The two accounts the scenario touches.
///
/// In the schedule notation `checking` is item X and `savings` is item Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKey {
    /// `checking`, item X
    Checking,
    /// `savings`, item Y
    Savings,
}

impl AccountKey {
    /// Every seeded account, in insertion order
    pub const ALL: [AccountKey; 2] = [AccountKey::Checking, AccountKey::Savings];

    /// Row key in the `accounts` table
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
        }
    }

    /// Item symbol used in the history notation
    pub fn symbol(self) -> char {
        match self {
            Self::Checking => 'X',
            Self::Savings => 'Y',
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `accounts` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub balance: Balance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_symbols() {
        assert_eq!(AccountKey::Checking.as_str(), "checking");
        assert_eq!(AccountKey::Savings.to_string(), "savings");
        assert_eq!(AccountKey::Checking.symbol(), 'X');
        assert_eq!(AccountKey::Savings.symbol(), 'Y');
    }

    #[test]
    fn test_key_serializes_as_row_name() {
        let json = serde_json::to_string(&AccountKey::Savings).unwrap();
        assert_eq!(json, "\"savings\"");
    }
}
