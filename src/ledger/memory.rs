//! In-Memory Store
//!
//! A [`Store`] kept entirely in process memory, with the locking behaviour
//! of a relational store:
//!
//! - Every account row has its own async lock. The first balance update of
//!   a unit of work takes it; it is held until commit, rollback or drop.
//! - Every account key also has a shared/exclusive lock. Any unit of work
//!   that references an account (transfer, entry or balance update) holds it
//!   shared until it ends; `delete_account` takes it exclusively, so a delete
//!   waits for those units and then sees their committed rows.
//! - Writes are buffered in the unit of work and only become visible on
//!   commit. Dropping an uncommitted unit of work discards them.
//! - Ids come from sequences that are never rolled back, so aborted units
//!   of work leave gaps like `BIGSERIAL` does.
//!
//! Fault injection ([`Faults`]) and the balance update log exist so tests
//! can force failures mid-transaction and observe lock order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, trace};

use super::error::LedgerError;
use super::repository::{Queries, Store, UnitOfWork};
use super::types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, ListParams, MinorUnits, Transfer,
    TransferId,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One issued balance update, in issue order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub tx_id: u64,
    pub account_id: AccountId,
    pub delta: MinorUnits,
}

/// Unit of work counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

/// Failure injection switches
#[derive(Default)]
pub struct Faults {
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_entries_for: Mutex<HashSet<AccountId>>,
    balance_update_delay: Mutex<Option<Duration>>,
    begin_delay: Mutex<Option<Duration>>,
}

impl Faults {
    pub fn fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    /// Make every `create_entry` for this account fail
    pub fn fail_entries_for(&self, account_id: AccountId) {
        lock(&self.fail_entries_for).insert(account_id);
    }

    /// Sleep after each balance update while still holding the row lock
    pub fn delay_balance_updates(&self, delay: Duration) {
        *lock(&self.balance_update_delay) = Some(delay);
    }

    /// Sleep in `begin` before the unit of work is handed out
    pub fn delay_begin(&self, delay: Duration) {
        *lock(&self.begin_delay) = Some(delay);
    }

    pub fn clear(&self) {
        self.fail_begin(false);
        self.fail_commit(false);
        self.fail_rollback(false);
        lock(&self.fail_entries_for).clear();
        *lock(&self.balance_update_delay) = None;
        *lock(&self.begin_delay) = None;
    }

    fn entry_fails(&self, account_id: AccountId) -> bool {
        lock(&self.fail_entries_for).contains(&account_id)
    }

    fn update_delay(&self) -> Option<Duration> {
        *lock(&self.balance_update_delay)
    }

    fn begin_delay(&self) -> Option<Duration> {
        *lock(&self.begin_delay)
    }
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transfers: BTreeMap<TransferId, Transfer>,
    entries: BTreeMap<EntryId, Entry>,
}

impl Tables {
    fn account_referenced(&self, id: AccountId) -> bool {
        self.entries.values().any(|e| e.account_id == id)
            || self
                .transfers
                .values()
                .any(|t| t.from_account_id == id || t.to_account_id == id)
    }
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    key_locks: Mutex<HashMap<AccountId, Arc<RwLock<()>>>>,
    account_seq: AtomicI64,
    transfer_seq: AtomicI64,
    entry_seq: AtomicI64,
    tx_seq: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    update_log: Mutex<Vec<BalanceUpdate>>,
    faults: Faults,
}

impl Shared {
    fn row_lock(&self, id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.row_locks).entry(id).or_default().clone()
    }

    fn key_lock(&self, id: AccountId) -> Arc<RwLock<()>> {
        lock(&self.key_locks).entry(id).or_default().clone()
    }

    fn forget_locks(&self, id: AccountId) {
        lock(&self.row_locks).remove(&id);
        lock(&self.key_locks).remove(&id);
    }

    fn account_exists(&self, id: AccountId) -> bool {
        lock(&self.tables).accounts.contains_key(&id)
    }
}

/// In-process ledger store
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                key_locks: Mutex::new(HashMap::new()),
                account_seq: AtomicI64::new(1),
                transfer_seq: AtomicI64::new(1),
                entry_seq: AtomicI64::new(1),
                tx_seq: AtomicU64::new(1),
                begun: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                rolled_back: AtomicU64::new(0),
                update_log: Mutex::new(Vec::new()),
                faults: Faults::default(),
            }),
        }
    }

    pub fn faults(&self) -> &Faults {
        &self.shared.faults
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            begun: self.shared.begun.load(Ordering::SeqCst),
            committed: self.shared.committed.load(Ordering::SeqCst),
            rolled_back: self.shared.rolled_back.load(Ordering::SeqCst),
        }
    }

    /// Every balance update issued so far, committed or not
    pub fn balance_update_log(&self) -> Vec<BalanceUpdate> {
        lock(&self.shared.update_log).clone()
    }

    pub fn clear_balance_update_log(&self) {
        lock(&self.shared.update_log).clear();
    }

    /// Committed transfer rows
    pub fn transfer_count(&self) -> usize {
        lock(&self.shared.tables).transfers.len()
    }

    /// Committed entry rows
    pub fn entry_count(&self) -> usize {
        lock(&self.shared.tables).entries.len()
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> MinorUnits {
        lock(&self.shared.tables)
            .accounts
            .values()
            .map(|a| a.balance)
            .sum()
    }
}

fn page<T>(rows: impl Iterator<Item = T>, params: ListParams) -> Vec<T> {
    rows.skip(params.offset as usize)
        .take(params.limit as usize)
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        if self.shared.faults.fail_begin.load(Ordering::SeqCst) {
            return Err(LedgerError::Transaction(
                "injected begin failure".to_string(),
            ));
        }
        if let Some(delay) = self.shared.faults.begin_delay() {
            tokio::time::sleep(delay).await;
        }
        let tx_id = self.shared.tx_seq.fetch_add(1, Ordering::SeqCst);
        self.shared.begun.fetch_add(1, Ordering::SeqCst);
        trace!(tx_id, "Memory unit of work opened");

        Ok(Box::new(MemoryTx {
            shared: self.shared.clone(),
            tx_id,
            held: BTreeMap::new(),
            key_shares: BTreeMap::new(),
            balance_deltas: BTreeMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
            finished: false,
        }))
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        lock(&self.shared.tables)
            .accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account, LedgerError> {
        params.validate()?;
        let account = Account {
            id: self.shared.account_seq.fetch_add(1, Ordering::SeqCst),
            owner: params.owner.clone(),
            balance: params.balance,
            currency: params.currency.clone(),
            created_at: Utc::now(),
        };
        lock(&self.shared.tables)
            .accounts
            .insert(account.id, account.clone());
        debug!(account_id = account.id, owner = %account.owner, "Account created");
        Ok(account)
    }

    async fn list_accounts(&self, params: ListParams) -> Result<Vec<Account>, LedgerError> {
        params.validate()?;
        let tables = lock(&self.shared.tables);
        Ok(page(tables.accounts.values().cloned(), params))
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        if !self.shared.account_exists(id) {
            return Err(LedgerError::AccountNotFound(id));
        }
        // Waits for every unit of work referencing the account
        let key = self.shared.key_lock(id);
        let _exclusive = key.write().await;

        {
            let mut tables = lock(&self.shared.tables);
            if !tables.accounts.contains_key(&id) {
                return Err(LedgerError::AccountNotFound(id));
            }
            if tables.account_referenced(id) {
                return Err(LedgerError::Constraint(format!(
                    "account {} is still referenced by ledger rows",
                    id
                )));
            }
            tables.accounts.remove(&id);
        }
        self.shared.forget_locks(id);
        debug!(account_id = id, "Account deleted");
        Ok(())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, LedgerError> {
        lock(&self.shared.tables)
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {}", id)))
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        params: ListParams,
    ) -> Result<Vec<Transfer>, LedgerError> {
        params.validate()?;
        let tables = lock(&self.shared.tables);
        let rows = tables
            .transfers
            .values()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .cloned();
        Ok(page(rows, params))
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, LedgerError> {
        lock(&self.shared.tables)
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("entry {}", id)))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        params: ListParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        params.validate()?;
        let tables = lock(&self.shared.tables);
        let rows = tables
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned();
        Ok(page(rows, params))
    }
}

/// Unit of work over a [`MemoryStore`]
pub struct MemoryTx {
    shared: Arc<Shared>,
    tx_id: u64,
    held: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    key_shares: BTreeMap<AccountId, OwnedRwLockReadGuard<()>>,
    balance_deltas: BTreeMap<AccountId, MinorUnits>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    finished: bool,
}

impl MemoryTx {
    fn pending_delta(&self, id: AccountId) -> MinorUnits {
        self.balance_deltas.get(&id).copied().unwrap_or(0)
    }

    /// Hold the account key shared until this unit of work ends
    ///
    /// Returns false when the account does not exist.
    async fn share_key(&mut self, id: AccountId) -> bool {
        if self.key_shares.contains_key(&id) {
            return true;
        }
        if !self.shared.account_exists(id) {
            return false;
        }
        let guard = self.shared.key_lock(id).read_owned().await;
        // A delete may have won the race for the key
        if !self.shared.account_exists(id) {
            return false;
        }
        self.key_shares.insert(id, guard);
        true
    }

    fn discard(&mut self) {
        self.balance_deltas.clear();
        self.transfers.clear();
        self.entries.clear();
        self.finished = true;
        self.shared.rolled_back.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            debug!(tx_id = self.tx_id, "Unit of work dropped without commit, rolling back");
            self.discard();
        }
        // Row locks are released when `held` drops
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        let mut account = lock(&self.shared.tables)
            .accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))?;
        account.balance += self.pending_delta(id);
        Ok(account)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Transfer, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::Constraint(
                "transfers_amount_check".to_string(),
            ));
        }
        if from_account_id == to_account_id {
            return Err(LedgerError::Constraint(
                "transfers_check: from_account_id <> to_account_id".to_string(),
            ));
        }
        for id in [from_account_id, to_account_id] {
            if !self.share_key(id).await {
                return Err(LedgerError::Constraint(format!(
                    "transfers references missing account {}",
                    id
                )));
            }
        }

        let transfer = Transfer {
            id: self.shared.transfer_seq.fetch_add(1, Ordering::SeqCst),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Entry, LedgerError> {
        if self.shared.faults.entry_fails(account_id) {
            return Err(LedgerError::Constraint(format!(
                "injected entry failure for account {}",
                account_id
            )));
        }
        if !self.share_key(account_id).await {
            return Err(LedgerError::Constraint(format!(
                "entries references missing account {}",
                account_id
            )));
        }

        let entry = Entry {
            id: self.shared.entry_seq.fetch_add(1, Ordering::SeqCst),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: MinorUnits,
    ) -> Result<Account, LedgerError> {
        lock(&self.shared.update_log).push(BalanceUpdate {
            tx_id: self.tx_id,
            account_id,
            delta,
        });

        if !self.share_key(account_id).await {
            return Err(LedgerError::AccountNotFound(account_id));
        }
        if !self.held.contains_key(&account_id) {
            let row = self.shared.row_lock(account_id);
            // Blocks while another unit of work holds the row
            let guard = row.lock_owned().await;
            self.held.insert(account_id, guard);
        }

        let mut account = lock(&self.shared.tables)
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        let pending = self
            .pending_delta(account_id)
            .checked_add(delta)
            .ok_or_else(|| LedgerError::Database("bigint out of range".to_string()))?;
        account.balance = account
            .balance
            .checked_add(pending)
            .ok_or_else(|| LedgerError::Database("bigint out of range".to_string()))?;
        self.balance_deltas.insert(account_id, pending);

        if let Some(delay) = self.shared.faults.update_delay() {
            tokio::time::sleep(delay).await;
        }
        Ok(account)
    }
}

#[async_trait]
impl UnitOfWork for MemoryTx {
    fn queries(&mut self) -> &mut dyn Queries {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let mut this = self;
        if this.shared.faults.fail_commit.load(Ordering::SeqCst) {
            this.discard();
            return Err(LedgerError::Transaction(
                "injected commit failure".to_string(),
            ));
        }

        {
            let mut tables = lock(&this.shared.tables);
            for (id, delta) in &this.balance_deltas {
                if let Some(account) = tables.accounts.get_mut(id) {
                    account.balance += delta;
                }
            }
            for transfer in this.transfers.drain(..) {
                tables.transfers.insert(transfer.id, transfer);
            }
            for entry in this.entries.drain(..) {
                tables.entries.insert(entry.id, entry);
            }
        }
        this.balance_deltas.clear();
        this.finished = true;
        this.shared.committed.fetch_add(1, Ordering::SeqCst);
        trace!(tx_id = this.tx_id, "Memory unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        let mut this = self;
        this.discard();
        if this.shared.faults.fail_rollback.load(Ordering::SeqCst) {
            return Err(LedgerError::Transaction(
                "injected rollback failure".to_string(),
            ));
        }
        trace!(tx_id = this.tx_id, "Memory unit of work rolled back");
        Ok(())
    }
}
