//! Transfer Engine
//!
//! Executes a fund movement between two accounts as one unit of work:
//!
//! 1. transfer row
//! 2. debit entry (`-amount`, source)
//! 3. credit entry (`+amount`, destination)
//! 4. both balance updates, lower account id first
//!
//! Requests that fail validation never open a transaction. Everything after
//! that either commits as a whole or is rolled back as a whole.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::error::LedgerError;
use super::ordering::add_balances_ordered;
use super::repository::{Queries, Store};
use super::state::{TransferState, TransferTrace};
use super::tx::exec_tx;
use super::types::{AccountId, MinorUnits, TransferResult};
use crate::config::LedgerConfig;

/// State reached inside the unit of work
///
/// Shared with the step so it survives the step being dropped at a deadline.
#[derive(Clone)]
struct Progress(Arc<Mutex<TransferState>>);

impl Progress {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(TransferState::Started)))
    }

    fn advance(&self, to: TransferState) -> Result<(), LedgerError> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transition(to)
    }

    fn reached(&self) -> TransferState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transfer engine over an injected store
pub struct TransferEngine {
    store: Arc<dyn Store>,
    tx_timeout: Option<Duration>,
}

impl TransferEngine {
    /// Create an engine with no transaction deadline
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            tx_timeout: None,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &LedgerConfig) -> Self {
        Self {
            store,
            tx_timeout: config.tx_timeout(),
        }
    }

    /// Abort and roll back any unit of work still running after `timeout`
    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = Some(timeout);
        self
    }

    /// Move `amount` minor units from one account to another
    ///
    /// Two calls with identical arguments produce two transfers.
    pub async fn execute_transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<TransferResult, LedgerError> {
        self.execute_transfer_traced(from_account_id, to_account_id, amount)
            .await
            .0
    }

    /// [`execute_transfer`](Self::execute_transfer), also reporting the states
    /// the execution went through
    ///
    /// The trace is `None` when validation rejected the request and no unit of
    /// work was opened.
    pub async fn execute_transfer_traced(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> (Result<TransferResult, LedgerError>, Option<TransferTrace>) {
        if let Err(e) = self.validate(from_account_id, to_account_id, amount).await {
            debug!(
                from = from_account_id,
                to = to_account_id,
                amount,
                code = e.code(),
                "Transfer rejected"
            );
            return (Err(e), None);
        }

        let progress = Progress::new();
        let tracker = progress.clone();
        let outcome = exec_tx(self.store.as_ref(), self.tx_timeout, move |q| {
            Box::pin(record_transfer(
                q,
                tracker,
                from_account_id,
                to_account_id,
                amount,
            ))
        })
        .await;
        let reached = progress.reached();

        match outcome {
            Ok(result) => {
                let committed = progress.advance(TransferState::Committed);
                debug_assert!(committed.is_ok(), "committed from {}", reached);
                info!(
                    transfer_id = result.transfer.id,
                    from = from_account_id,
                    to = to_account_id,
                    amount,
                    state = %TransferState::Committed,
                    "Transfer committed"
                );
                let trace = TransferTrace {
                    reached,
                    outcome: TransferState::Committed,
                };
                (Ok(result), Some(trace))
            }
            Err(e @ LedgerError::RollbackFailed { .. }) => {
                error!(
                    from = from_account_id,
                    to = to_account_id,
                    amount,
                    reached = %reached,
                    code = e.code(),
                    error = %e,
                    "Transfer failed and its rollback failed"
                );
                let trace = TransferTrace {
                    reached,
                    outcome: reached,
                };
                (Err(e), Some(trace))
            }
            Err(e) => {
                let outcome = match progress.advance(TransferState::RolledBack) {
                    Ok(()) => TransferState::RolledBack,
                    Err(_) => reached,
                };
                warn!(
                    from = from_account_id,
                    to = to_account_id,
                    amount,
                    reached = %reached,
                    state = %outcome,
                    code = e.code(),
                    error = %e,
                    "Transfer rolled back"
                );
                (Err(e), Some(TransferTrace { reached, outcome }))
            }
        }
    }

    /// Checks that need no transaction: amount, distinct accounts, existence, currency
    async fn validate(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if from_account_id == to_account_id {
            return Err(LedgerError::SameAccount);
        }

        let from = self.store.get_account(from_account_id).await?;
        let to = self.store.get_account(to_account_id).await?;
        if from.currency != to.currency {
            return Err(LedgerError::CurrencyMismatch {
                from: from.currency,
                to: to.currency,
            });
        }
        Ok(())
    }
}

/// The write sequence run inside the unit of work
async fn record_transfer(
    q: &mut dyn Queries,
    progress: Progress,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: MinorUnits,
) -> Result<TransferResult, LedgerError> {
    let transfer = q
        .create_transfer(from_account_id, to_account_id, amount)
        .await?;
    progress.advance(TransferState::TransferRecorded)?;

    let from_entry = q
        .create_entry(transfer.from_account_id, -transfer.amount)
        .await?;
    let to_entry = q
        .create_entry(transfer.to_account_id, transfer.amount)
        .await?;
    progress.advance(TransferState::EntriesRecorded)?;
    debug_assert_eq!(from_entry.amount + to_entry.amount, 0);

    let (from_account, to_account) =
        add_balances_ordered(q, from_account_id, to_account_id, amount).await?;
    progress.advance(TransferState::BalancesUpdated)?;

    Ok(TransferResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}
