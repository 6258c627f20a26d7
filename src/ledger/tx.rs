//! Transaction Wrapper
//!
//! Owns the begin/commit/rollback contract around a caller-supplied step.
//! The step only sees the transaction-scoped [`Queries`] surface; it cannot
//! commit or roll back on its own.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::error::LedgerError;
use super::repository::{Queries, Store};

/// Run `step` inside one unit of work
///
/// - `Ok` from the step commits; a failed commit is reported as a
///   `Transaction` error.
/// - `Err` from the step rolls back and returns the step's error. If the
///   rollback fails too, both errors come back in `RollbackFailed`.
/// - With a `timeout`, a step still running at the deadline is dropped and
///   the unit of work rolled back with `Cancelled`. No commit is attempted
///   after that point.
///
/// No retries. Dropping the returned future drops the open transaction,
/// which rolls it back.
pub async fn exec_tx<T, F>(
    store: &dyn Store,
    timeout: Option<Duration>,
    step: F,
) -> Result<T, LedgerError>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut dyn Queries) -> BoxFuture<'c, Result<T, LedgerError>> + Send,
{
    let mut tx = store
        .begin()
        .await
        .map_err(|e| as_transaction_error("begin", e))?;

    let outcome = {
        let work = step(tx.queries());
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        store = store.name(),
                        timeout_ms = limit.as_millis() as u64,
                        "Unit of work exceeded deadline"
                    );
                    Err(LedgerError::Cancelled)
                }
            },
            None => work.await,
        }
    };

    match outcome {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| as_transaction_error("commit", e))?;
            debug!(store = store.name(), "Unit of work committed");
            Ok(value)
        }
        Err(cause) => match tx.rollback().await {
            Ok(()) => {
                debug!(store = store.name(), error = %cause, "Unit of work rolled back");
                Err(cause)
            }
            Err(rollback) => {
                error!(
                    store = store.name(),
                    error = %cause,
                    rollback_error = %rollback,
                    "Rollback failed"
                );
                Err(LedgerError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                })
            }
        },
    }
}

fn as_transaction_error(stage: &str, e: LedgerError) -> LedgerError {
    match e {
        LedgerError::Transaction(_) | LedgerError::Cancelled => e,
        other => LedgerError::Transaction(format!("{} failed: {}", stage, other)),
    }
}
