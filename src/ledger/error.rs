//! Ledger Error Types
//!
//! One enum for every failure the engine, the transaction wrapper and the
//! stores can report. Variants group into four families (see [`ErrorKind`]):
//! validation failures never open a transaction, everything else aborts the
//! unit of work that observed it.

use thiserror::Error;

use super::types::AccountId;

/// Error family, used by callers to map failures onto their own surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transaction,
    Constraint,
    Database,
}

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination account cannot be the same")]
    SameAccount,

    #[error("Currency mismatch: source holds {from}, destination holds {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // === Not Found Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Record not found: {0}")]
    NotFound(String),

    // === Transaction Errors ===
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Transaction cancelled before commit")]
    Cancelled,

    #[error("txErr: {cause}, rbErr: {rollback}")]
    RollbackFailed {
        cause: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    // === Store Errors ===
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Error family
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount
            | LedgerError::SameAccount
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::InvalidArgument(_) => ErrorKind::Validation,
            LedgerError::AccountNotFound(_) | LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Transaction(_)
            | LedgerError::Cancelled
            | LedgerError::RollbackFailed { .. } => ErrorKind::Transaction,
            LedgerError::Constraint(_) => ErrorKind::Constraint,
            LedgerError::Database(_) => ErrorKind::Database,
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::SameAccount => "SAME_ACCOUNT",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::Transaction(_) => "TRANSACTION_ERROR",
            LedgerError::Cancelled => "TRANSACTION_CANCELLED",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            LedgerError::Constraint(_) => "CONSTRAINT_VIOLATION",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Constraint => 409,
            ErrorKind::Transaction => match self {
                LedgerError::Cancelled => 408,
                _ => 500,
            },
            ErrorKind::Database => 500,
        }
    }

    /// The error that aborted the unit of work, looking through a failed rollback
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// SQLSTATE codes Postgres uses for serialization failure and detected deadlock
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => LedgerError::NotFound(e.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                if matches!(
                    code.as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ) {
                    return LedgerError::Transaction(db_err.message().to_string());
                }
                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => {
                        LedgerError::Constraint(db_err.message().to_string())
                    }
                    _ => LedgerError::Database(db_err.message().to_string()),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                LedgerError::Transaction(e.to_string())
            }
            _ => LedgerError::Database(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(LedgerError::InvalidAmount.kind(), ErrorKind::Validation);
        assert_eq!(LedgerError::SameAccount.kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::CurrencyMismatch {
                from: "USD".into(),
                to: "EUR".into()
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(LedgerError::AccountNotFound(7).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::Cancelled.kind(), ErrorKind::Transaction);
        assert_eq!(
            LedgerError::Constraint("fk".into()).kind(),
            ErrorKind::Constraint
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::SameAccount.code(), "SAME_ACCOUNT");
        assert_eq!(LedgerError::AccountNotFound(1).code(), "ACCOUNT_NOT_FOUND");
        assert_eq!(LedgerError::Cancelled.code(), "TRANSACTION_CANCELLED");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidAmount.http_status(), 400);
        assert_eq!(LedgerError::AccountNotFound(1).http_status(), 404);
        assert_eq!(LedgerError::Constraint("fk".into()).http_status(), 409);
        assert_eq!(LedgerError::Cancelled.http_status(), 408);
        assert_eq!(LedgerError::Transaction("x".into()).http_status(), 500);
    }

    #[test]
    fn test_rollback_failed_keeps_both_causes() {
        let err = LedgerError::RollbackFailed {
            cause: Box::new(LedgerError::Constraint("entries_account_id_fkey".into())),
            rollback: Box::new(LedgerError::Transaction("connection reset".into())),
        };

        let msg = err.to_string();
        assert!(msg.contains("entries_account_id_fkey"));
        assert!(msg.contains("connection reset"));
        assert_eq!(err.kind(), ErrorKind::Transaction);
        assert!(matches!(err.root_cause(), LedgerError::Constraint(_)));
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let err: LedgerError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_from_sqlx_pool_timeout() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind(), ErrorKind::Transaction);
    }
}
