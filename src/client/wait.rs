//! Bounded confirmation polling

use crate::ledger::{Node, PendingTransaction, TxId};
use crate::{Error, Result};

/// Poll until `txid` is confirmed, its group fails, or `wait_rounds` rounds pass
pub async fn wait_for_confirmation(
    node: &dyn Node,
    txid: &TxId,
    wait_rounds: u64,
) -> Result<PendingTransaction> {
    let start = node.status().await?.last_round + 1;
    let mut current = start;

    while current < start + wait_rounds {
        let pending = node.pending_transaction_info(txid).await?;
        if let Some(round) = pending.confirmed_round
            && round > 0
        {
            tracing::debug!("Transaction {} confirmed in round {}", txid, round);
            return Ok(pending);
        }
        if !pending.pool_error.is_empty() {
            return Err(Error::Pool {
                txid: txid.to_string(),
                message: pending.pool_error,
            });
        }
        node.status_after_block(current).await?;
        current += 1;
    }

    Err(Error::Timeout {
        txid: txid.to_string(),
        rounds: wait_rounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Account;
    use crate::ledger::{LedgerState, SimulatedNode, Transaction};
    use std::time::Duration;

    async fn submit_payment(node: &SimulatedNode, account: &Account) -> TxId {
        let params = node.suggested_params().await.unwrap();
        let txn = Transaction::payment(account.address(), &params, account.address(), 0);
        node.send_transactions(&[account.sign(txn).unwrap()])
            .await
            .unwrap()
    }

    fn funded(account: &Account) -> SimulatedNode {
        SimulatedNode::new(
            LedgerState::genesis("sim", [(account.address(), 1_000_000)]),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_confirms() {
        let account = Account::generate().unwrap();
        let node = funded(&account);
        let txid = submit_payment(&node, &account).await;
        let pending = wait_for_confirmation(&node, &txid, 10).await.unwrap();
        assert!(pending.is_confirmed());
    }

    #[tokio::test]
    async fn test_times_out_when_pool_is_held() {
        let account = Account::generate().unwrap();
        let node = funded(&account);
        node.hold_pending(true);
        let txid = submit_payment(&node, &account).await;
        let err = wait_for_confirmation(&node, &txid, 3).await.unwrap_err();
        assert!(err.is_fatal_timeout());
        assert_eq!(
            err.to_string(),
            format!("Transaction {} not confirmed after 3 rounds", txid)
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let account = Account::generate().unwrap();
        let node = funded(&account);
        let err = wait_for_confirmation(&node, &TxId([0; 32]), 3).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTransaction(_)));
    }
}
