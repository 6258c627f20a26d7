//! Ledger record types
//!
//! Rows of the `accounts`, `transfers` and `entries` tables, plus the
//! parameter and result structs passed across the repository seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::error::LedgerError;

/// Account ID - `BIGSERIAL` primary key, never reused.
pub type AccountId = i64;

/// Transfer ID
pub type TransferId = i64;

/// Entry ID
pub type EntryId = i64;

/// Amount in minor currency units (cents, satoshi, ...).
///
/// Signed: entries carry `-amount` for the debited side.
pub type MinorUnits = i64;

/// A customer account holding a single-currency balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: MinorUnits,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// A fund movement between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: MinorUnits,
    pub created_at: DateTime<Utc>,
}

/// A signed ledger line for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: MinorUnits,
    pub created_at: DateTime<Utc>,
}

/// Everything a committed transfer produced
///
/// `from_account` and `to_account` hold the balances after the update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}

/// Parameters for opening a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: MinorUnits,
    pub currency: String,
}

impl CreateAccountParams {
    pub fn new(owner: impl Into<String>, balance: MinorUnits, currency: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency: currency.into(),
        }
    }

    /// Reject parameters the store would otherwise accept silently
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.owner.trim().is_empty() {
            return Err(LedgerError::InvalidArgument(
                "owner must not be empty".to_string(),
            ));
        }
        if self.balance < 0 {
            return Err(LedgerError::InvalidArgument(
                "opening balance must not be negative".to_string(),
            ));
        }
        if !is_currency_code(&self.currency) {
            return Err(LedgerError::InvalidArgument(format!(
                "invalid currency code: {}",
                self.currency
            )));
        }
        Ok(())
    }
}

/// ISO-4217 shape: three upper-case ASCII letters
fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Limit/offset paging for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
}

impl ListParams {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.limit <= 0 {
            return Err(LedgerError::InvalidArgument(
                "limit must be positive".to_string(),
            ));
        }
        if self.offset < 0 {
            return Err(LedgerError::InvalidArgument(
                "offset must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}
