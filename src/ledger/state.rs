//! Transfer Execution States
//!
//! ```text
//! STARTED → TRANSFER_RECORDED → ENTRIES_RECORDED → BALANCES_UPDATED → COMMITTED
//!    ↓              ↓                  ↓                   ↓
//!    └──────────────┴──────── ROLLED_BACK ─────────────────┘
//! ```
//!
//! Executions only move forward, or to `RolledBack`. No state is revisited.

use std::fmt;

use tracing::debug;

use super::error::LedgerError;

/// Transfer execution states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Request validated, unit of work about to open
    Started,

    /// Transfer row inserted (uncommitted)
    TransferRecorded,

    /// Debit and credit entries inserted (uncommitted)
    EntriesRecorded,

    /// Both balance rows updated and locked
    BalancesUpdated,

    /// Terminal: unit of work committed
    Committed,

    /// Terminal: unit of work rolled back, nothing persisted
    RolledBack,
}

impl TransferState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Committed | TransferState::RolledBack)
    }

    /// The next state on the success path, `None` once terminal
    pub fn next(&self) -> Option<TransferState> {
        match self {
            TransferState::Started => Some(TransferState::TransferRecorded),
            TransferState::TransferRecorded => Some(TransferState::EntriesRecorded),
            TransferState::EntriesRecorded => Some(TransferState::BalancesUpdated),
            TransferState::BalancesUpdated => Some(TransferState::Committed),
            TransferState::Committed | TransferState::RolledBack => None,
        }
    }

    /// Whether `self → to` is a legal transition
    pub fn can_transition_to(&self, to: TransferState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == TransferState::RolledBack || self.next() == Some(to)
    }

    /// Validate and perform a transition
    pub fn transition(&mut self, to: TransferState) -> Result<(), LedgerError> {
        if !self.can_transition_to(to) {
            return Err(LedgerError::Transaction(format!(
                "invalid state transition {} -> {}",
                self, to
            )));
        }
        debug!(from = %self, to = %to, "Transfer state transition");
        *self = to;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Started => "STARTED",
            TransferState::TransferRecorded => "TRANSFER_RECORDED",
            TransferState::EntriesRecorded => "ENTRIES_RECORDED",
            TransferState::BalancesUpdated => "BALANCES_UPDATED",
            TransferState::Committed => "COMMITTED",
            TransferState::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How far one execution got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTrace {
    /// Last state reached inside the unit of work
    pub reached: TransferState,
    /// `Committed` or `RolledBack`, or `reached` when the rollback itself failed
    pub outcome: TransferState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Committed.is_terminal());
        assert!(TransferState::RolledBack.is_terminal());

        assert!(!TransferState::Started.is_terminal());
        assert!(!TransferState::TransferRecorded.is_terminal());
        assert!(!TransferState::EntriesRecorded.is_terminal());
        assert!(!TransferState::BalancesUpdated.is_terminal());
    }

    #[test]
    fn test_happy_path_walks_forward() {
        let mut state = TransferState::Started;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            state.transition(next).unwrap();
            seen.push(state);
        }

        assert_eq!(
            seen,
            vec![
                TransferState::Started,
                TransferState::TransferRecorded,
                TransferState::EntriesRecorded,
                TransferState::BalancesUpdated,
                TransferState::Committed,
            ]
        );
    }

    #[test]
    fn test_rollback_reachable_from_every_non_terminal_state() {
        for state in [
            TransferState::Started,
            TransferState::TransferRecorded,
            TransferState::EntriesRecorded,
            TransferState::BalancesUpdated,
        ] {
            assert!(state.can_transition_to(TransferState::RolledBack));
        }
        assert!(!TransferState::Committed.can_transition_to(TransferState::RolledBack));
    }

    #[test]
    fn test_no_backward_or_skipping_transitions() {
        let mut state = TransferState::EntriesRecorded;
        assert!(state.transition(TransferState::TransferRecorded).is_err());
        assert!(state.transition(TransferState::Committed).is_err());
        assert_eq!(state, TransferState::EntriesRecorded);

        let mut done = TransferState::RolledBack;
        assert!(done.transition(TransferState::Started).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferState::Started.to_string(), "STARTED");
        assert_eq!(TransferState::Committed.to_string(), "COMMITTED");
        assert_eq!(TransferState::RolledBack.to_string(), "ROLLED_BACK");
    }
}
