//! Repository Seam
//!
//! Storage capabilities the transfer engine consumes. A [`Store`] hands out
//! transaction-scoped [`UnitOfWork`] handles; the engine only ever writes
//! through one of those.
//!
//! # Contract
//!
//! - `add_account_balance` applies the delta inside the store
//!   (`balance = balance + delta`) and returns the row after the update.
//!   It takes the row lock that the account keeps until the unit of work ends.
//! - A `UnitOfWork` dropped without `commit` rolls back.

use async_trait::async_trait;

use super::error::LedgerError;
use super::types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, ListParams, MinorUnits, Transfer,
    TransferId,
};

/// Read/write surface available inside a unit of work
#[async_trait]
pub trait Queries: Send {
    /// Current row, including writes made earlier in this unit of work
    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError>;

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Transfer, LedgerError>;

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Entry, LedgerError>;

    /// Signed server-side balance update, returns the post-update row
    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: MinorUnits,
    ) -> Result<Account, LedgerError>;
}

/// An open transaction
#[async_trait]
pub trait UnitOfWork: Queries {
    /// View this handle as the plain query surface passed to step callbacks
    fn queries(&mut self) -> &mut dyn Queries;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Ledger storage backend
///
/// Everything outside `begin` runs in its own implicit transaction.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Open a unit of work
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError>;

    /// Committed account row, `AccountNotFound` if absent
    async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError>;

    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account, LedgerError>;

    /// Accounts ordered by id
    async fn list_accounts(&self, params: ListParams) -> Result<Vec<Account>, LedgerError>;

    /// Fails with `Constraint` while transfers or entries reference the account
    async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError>;

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, LedgerError>;

    /// Transfers where the account is on either side, ordered by id
    async fn list_transfers(
        &self,
        account_id: AccountId,
        params: ListParams,
    ) -> Result<Vec<Transfer>, LedgerError>;

    async fn get_entry(&self, id: EntryId) -> Result<Entry, LedgerError>;

    /// Entries of one account, ordered by id
    async fn list_entries(
        &self,
        account_id: AccountId,
        params: ListParams,
    ) -> Result<Vec<Entry>, LedgerError>;
}
