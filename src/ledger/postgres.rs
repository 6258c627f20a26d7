//! PostgreSQL Store
//!
//! `sqlx` implementation of the repository seam. Every statement is written
//! once against a generic executor, so the same SQL runs on the pool (implicit
//! transaction) and inside a unit of work.
//!
//! Balance changes are a single `UPDATE ... SET balance = balance + $1`, which
//! takes the row lock and never reads the balance back into the application
//! first.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction as SqlxTransaction};
use tracing::trace;

use super::error::LedgerError;
use super::repository::{Queries, Store, UnitOfWork};
use super::types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, ListParams, MinorUnits, Transfer,
    TransferId,
};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";

// === Statements ===

async fn get_account<'e, E: PgExecutor<'e>>(
    executor: E,
    id: AccountId,
) -> Result<Account, LedgerError> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {} FROM accounts WHERE id = $1",
        ACCOUNT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(LedgerError::AccountNotFound(id))
}

async fn create_transfer<'e, E: PgExecutor<'e>>(
    executor: E,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: MinorUnits,
) -> Result<Transfer, LedgerError> {
    let transfer = sqlx::query_as::<_, Transfer>(&format!(
        r#"
        INSERT INTO transfers (from_account_id, to_account_id, amount)
        VALUES ($1, $2, $3)
        RETURNING {}
        "#,
        TRANSFER_COLUMNS
    ))
    .bind(from_account_id)
    .bind(to_account_id)
    .bind(amount)
    .fetch_one(executor)
    .await?;
    Ok(transfer)
}

async fn create_entry<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: AccountId,
    amount: MinorUnits,
) -> Result<Entry, LedgerError> {
    let entry = sqlx::query_as::<_, Entry>(&format!(
        "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
        ENTRY_COLUMNS
    ))
    .bind(account_id)
    .bind(amount)
    .fetch_one(executor)
    .await?;
    Ok(entry)
}

async fn add_account_balance<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: AccountId,
    delta: MinorUnits,
) -> Result<Account, LedgerError> {
    sqlx::query_as::<_, Account>(&format!(
        r#"
        UPDATE accounts
        SET balance = balance + $1
        WHERE id = $2
        RETURNING {}
        "#,
        ACCOUNT_COLUMNS
    ))
    .bind(delta)
    .bind(account_id)
    .fetch_optional(executor)
    .await?
    .ok_or(LedgerError::AccountNotFound(account_id))
}

/// PostgreSQL-backed ledger store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        let tx = self.pool.begin().await?;
        trace!("Postgres transaction opened");
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        get_account(&self.pool, id).await
    }

    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account, LedgerError> {
        params.validate()?;
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&self.pool)
        .await?;
        Ok(account)
    }

    async fn list_accounts(&self, params: ListParams) -> Result<Vec<Account>, LedgerError> {
        params.validate()?;
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts ORDER BY id LIMIT $1 OFFSET $2",
            ACCOUNT_COLUMNS
        ))
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(id));
        }
        Ok(())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {} FROM transfers WHERE id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("transfer {}", id)))
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        params: ListParams,
    ) -> Result<Vec<Transfer>, LedgerError> {
        params.validate()?;
        let transfers = sqlx::query_as::<_, Transfer>(&format!(
            r#"
            SELECT {} FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(transfers)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(&format!(
            "SELECT {} FROM entries WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("entry {}", id)))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        params: ListParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        params.validate()?;
        let entries = sqlx::query_as::<_, Entry>(&format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

/// Unit of work over one pooled connection
///
/// `sqlx` rolls the transaction back when it is dropped uncommitted.
pub struct PgTx {
    tx: SqlxTransaction<'static, Postgres>,
}

#[async_trait]
impl Queries for PgTx {
    async fn get_account(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        get_account(&mut *self.tx, id).await
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Transfer, LedgerError> {
        create_transfer(&mut *self.tx, from_account_id, to_account_id, amount).await
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Entry, LedgerError> {
        create_entry(&mut *self.tx, account_id, amount).await
    }

    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: MinorUnits,
    ) -> Result<Account, LedgerError> {
        add_account_balance(&mut *self.tx, account_id, delta).await
    }
}

#[async_trait]
impl UnitOfWork for PgTx {
    fn queries(&mut self) -> &mut dyn Queries {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
