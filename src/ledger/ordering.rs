//! Balance Update Ordering
//!
//! Every transfer touches two balance rows. Updating them in ascending
//! account-id order gives all concurrent transfers one global lock order,
//! so two transfers sharing an account can never wait on each other in a
//! cycle. Direction (who is source, who is destination) plays no part.

use tracing::trace;

use super::error::LedgerError;
use super::repository::Queries;
use super::types::{Account, AccountId, MinorUnits};

/// One signed balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: AccountId,
    pub delta: MinorUnits,
}

/// Order in which the two balance updates of a transfer are issued
///
/// Lower account id first; each side keeps its own delta
/// (`-amount` for the source, `+amount` for the destination).
pub fn lock_order(
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: MinorUnits,
) -> [BalanceDelta; 2] {
    let debit = BalanceDelta {
        account_id: from_account_id,
        delta: -amount,
    };
    let credit = BalanceDelta {
        account_id: to_account_id,
        delta: amount,
    };

    if from_account_id < to_account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

/// Apply both deltas of a transfer in lock order
///
/// Returns `(from_account, to_account)` after the update, whichever went first.
pub async fn add_balances_ordered(
    queries: &mut dyn Queries,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: MinorUnits,
) -> Result<(Account, Account), LedgerError> {
    let [first, second] = lock_order(from_account_id, to_account_id, amount);

    trace!(
        first = first.account_id,
        second = second.account_id,
        "Applying balance updates"
    );
    let first_account = queries
        .add_account_balance(first.account_id, first.delta)
        .await?;
    let second_account = queries
        .add_account_balance(second.account_id, second.delta)
        .await?;

    if first.account_id == from_account_id {
        Ok((first_account, second_account))
    } else {
        Ok((second_account, first_account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_id_first_regardless_of_direction() {
        let forward = lock_order(3, 7, 25);
        let backward = lock_order(7, 3, 25);

        assert_eq!(forward[0].account_id, 3);
        assert_eq!(forward[1].account_id, 7);
        assert_eq!(backward[0].account_id, 3);
        assert_eq!(backward[1].account_id, 7);
    }

    #[test]
    fn test_deltas_follow_their_accounts() {
        // 3 -> 7: account 3 pays
        let forward = lock_order(3, 7, 25);
        assert_eq!(forward[0], BalanceDelta { account_id: 3, delta: -25 });
        assert_eq!(forward[1], BalanceDelta { account_id: 7, delta: 25 });

        // 7 -> 3: account 3 receives, but is still updated first
        let backward = lock_order(7, 3, 25);
        assert_eq!(backward[0], BalanceDelta { account_id: 3, delta: 25 });
        assert_eq!(backward[1], BalanceDelta { account_id: 7, delta: -25 });
    }

    #[test]
    fn test_deltas_sum_to_zero() {
        for (from, to, amount) in [(1, 2, 30), (2, 1, 30), (10, 4, 1), (i64::MAX, 1, 99)] {
            let [a, b] = lock_order(from, to, amount);
            assert_eq!(a.delta + b.delta, 0);
            assert!(a.account_id < b.account_id);
        }
    }
}
