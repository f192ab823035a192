// Balance/Transaction Ledger
//
// Every payout, bonus or claim in the system is one balance mutation plus
// one immutable transaction record, and both go through here. Balance
// mutations are atomic increments at the store level, never a rewrite of a
// stale read.

use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerResult, StoreError};
use crate::models::collections;
use crate::models::{Transaction, TransactionStatus, TransactionType};
use crate::store::{Filter, LedgerStore};

pub struct Ledger;

impl Ledger {
    /// Credit `amount` to the user's balance and append the matching
    /// transaction record.
    pub async fn credit<S: LedgerStore>(
        store: &S,
        user_id: &str,
        amount: i64,
        tx_type: TransactionType,
        description: &str,
        referral_user_id: Option<&str>,
    ) -> LedgerResult<Transaction> {
        let balance = store
            .increment(collections::USERS, user_id, "balance", amount)
            .await?;
        let tx = Self::record(store, user_id, amount, tx_type, description, referral_user_id)
            .await?;
        info!(
            "Credited {} to user {} ({:?}), balance now {}",
            amount, user_id, tx_type, balance
        );
        Ok(tx)
    }

    /// Debit `amount` from the user's balance if it covers the amount, and
    /// append the matching transaction record. Returns `None` when the
    /// balance is insufficient; nothing is written in that case.
    pub async fn try_debit<S: LedgerStore>(
        store: &S,
        user_id: &str,
        amount: i64,
        tx_type: TransactionType,
        description: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let debited = store
            .increment_if(
                collections::USERS,
                user_id,
                "balance",
                -amount,
                crate::store::Guard::at_least("balance", amount),
            )
            .await?;
        if !debited {
            return Ok(None);
        }
        let tx = Self::record(store, user_id, amount, tx_type, description, None).await?;
        info!("Debited {} from user {} ({:?})", amount, user_id, tx_type);
        Ok(Some(tx))
    }

    /// Undo a debit after a later step of the caller's flow failed. Balance
    /// only; the original transaction record stays in the audit trail.
    pub async fn refund<S: LedgerStore>(
        store: &S,
        user_id: &str,
        amount: i64,
    ) -> LedgerResult<()> {
        store
            .increment(collections::USERS, user_id, "balance", amount)
            .await?;
        Ok(())
    }

    /// Append an immutable transaction record.
    pub async fn record<S: LedgerStore>(
        store: &S,
        user_id: &str,
        amount: i64,
        tx_type: TransactionType,
        description: &str,
        referral_user_id: Option<&str>,
    ) -> LedgerResult<Transaction> {
        let tx = Transaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tx_type,
            amount,
            status: TransactionStatus::Completed,
            timestamp: store.server_time(),
            description: description.to_string(),
            referral_user_id: referral_user_id.map(str::to_string),
        };
        store
            .create(
                collections::TRANSACTIONS,
                &tx.id,
                serde_json::to_value(&tx)?,
            )
            .await?;
        Ok(tx)
    }

    /// A user's transactions, newest first. Read path: a missing collection
    /// is just an empty history.
    pub async fn transactions_for<S: LedgerStore>(
        store: &S,
        user_id: &str,
    ) -> LedgerResult<Vec<Transaction>> {
        let docs = match store
            .query_ordered(
                collections::TRANSACTIONS,
                &[Filter::eq("user_id", user_id)],
                "timestamp",
                true,
            )
            .await
        {
            Ok(docs) => docs,
            Err(StoreError::NotFound(_, _)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut txs = Vec::with_capacity(docs.len());
        for doc in docs {
            txs.push(doc.decode()?);
        }
        Ok(txs)
    }
}
