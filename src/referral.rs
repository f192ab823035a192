// Referral Graph & Bonus Engine
//
// Walks up to three levels of referrer ancestry on a user's first
// qualifying deposit and pays each ancestor a level-scaled share. Every
// payout is deduplicated against the transaction log keyed by the
// downstream user, so a raced or retried first-deposit gate can never pay
// the same (referrer, referred) pair twice.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::share_of;
use crate::error::LedgerResult;
use crate::ledger::Ledger;
use crate::models::collections;
use crate::models::{Notification, TransactionType, User};
use crate::store::{Filter, LedgerStore};

/// Bonus share per ancestor level, in basis points of the deposit.
pub const LEVEL_SHARES_BPS: [i64; 3] = [1_900, 200, 100];

/// Registration-time welcome bonus base and the referrer's flat cut.
pub const WELCOME_BONUS: i64 = 500;
pub const WELCOME_SHARE_BPS: i64 = 2_400;

/// One bonus paid to one ancestor.
#[derive(Debug, Clone)]
pub struct BonusPayout {
    pub referrer_id: String,
    pub level: usize,
    pub amount: i64,
}

pub struct Referrals;

impl Referrals {
    /// Pay multi-level bonuses for a user's first qualifying deposit.
    ///
    /// The caller gates on "first deposit"; this additionally self-guards
    /// per ancestor via a transaction-log lookup, and each level is
    /// isolated: one ancestor's failure never blocks the others.
    pub async fn process_deposit_referral_bonus<S: LedgerStore>(
        store: &S,
        user_id: &str,
        deposit_amount: i64,
    ) -> LedgerResult<Vec<BonusPayout>> {
        let Some(user) = Self::load_user(store, user_id).await? else {
            return Ok(Vec::new());
        };
        if user.referred_by.is_none() {
            return Ok(Vec::new());
        }

        let ancestors = Self::ancestors(store, &user, LEVEL_SHARES_BPS.len()).await?;
        let mut payouts = Vec::new();
        for (level, ancestor) in ancestors.iter().enumerate() {
            let amount = share_of(deposit_amount, LEVEL_SHARES_BPS[level]);
            if amount == 0 {
                continue;
            }
            match Self::pay_level(store, ancestor, &user, level + 1, amount).await {
                Ok(true) => payouts.push(BonusPayout {
                    referrer_id: ancestor.id.clone(),
                    level: level + 1,
                    amount,
                }),
                Ok(false) => {
                    info!(
                        "Referral bonus already paid to {} for {}",
                        ancestor.id, user.id
                    );
                }
                Err(e) => {
                    // Isolated per level; the remaining ancestors still get paid
                    warn!(
                        "Level {} referral bonus failed for referrer {}: {}",
                        level + 1,
                        ancestor.id,
                        e
                    );
                }
            }
        }
        Ok(payouts)
    }

    /// Legacy registration-time flat bonus to the direct referrer. Fully
    /// best-effort: no sub-step failure ever propagates to registration.
    pub async fn process_welcome_bonus<S: LedgerStore>(
        store: &S,
        new_user_id: &str,
        referrer_id: &str,
    ) {
        let amount = share_of(WELCOME_BONUS, WELCOME_SHARE_BPS);
        let description = format!("Welcome bonus for referring user {}", new_user_id);
        match Ledger::credit(
            store,
            referrer_id,
            amount,
            TransactionType::ReferralBonus,
            &description,
            Some(new_user_id),
        )
        .await
        {
            Ok(_) => {
                if let Err(e) = store
                    .increment(collections::USERS, referrer_id, "referral_earnings", amount)
                    .await
                {
                    warn!("Referral earnings counter not updated: {}", e);
                }
                Self::notify(
                    store,
                    referrer_id,
                    "Referral bonus",
                    &format!("You earned {} for a new referral", amount),
                )
                .await;
            }
            Err(e) => warn!(
                "Welcome bonus to {} for {} failed: {}",
                referrer_id, new_user_id, e
            ),
        }
    }

    /// Pays one ancestor unless the transaction log already holds a
    /// Referral_Bonus from this downstream user. Returns whether a payment
    /// was made.
    async fn pay_level<S: LedgerStore>(
        store: &S,
        referrer: &User,
        user: &User,
        level: usize,
        amount: i64,
    ) -> LedgerResult<bool> {
        let existing = store
            .query(
                collections::TRANSACTIONS,
                &[
                    Filter::eq("user_id", referrer.id.as_str()),
                    Filter::eq("tx_type", "Referral_Bonus"),
                    Filter::eq("referral_user_id", user.id.as_str()),
                ],
            )
            .await?;
        if !existing.is_empty() {
            return Ok(false);
        }

        let description = format!(
            "Level {} referral bonus from deposit by {}",
            level, user.username
        );
        Ledger::credit(
            store,
            &referrer.id,
            amount,
            TransactionType::ReferralBonus,
            &description,
            Some(&user.id),
        )
        .await?;
        if let Err(e) = store
            .increment(collections::USERS, &referrer.id, "referral_earnings", amount)
            .await
        {
            warn!("Referral earnings counter not updated: {}", e);
        }
        Self::notify(
            store,
            &referrer.id,
            "Referral bonus",
            &format!("You earned {} from a level {} referral deposit", amount, level),
        )
        .await;
        Ok(true)
    }

    /// Ancestor chain via `referred_by`, nearest first, capped at
    /// `max_levels`. A visited set guards against referral cycles; broken
    /// links just end the walk.
    async fn ancestors<S: LedgerStore>(
        store: &S,
        user: &User,
        max_levels: usize,
    ) -> LedgerResult<Vec<User>> {
        let mut chain = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(user.id.clone());

        let mut next = user.referred_by.clone();
        while let Some(referrer_id) = next {
            if chain.len() >= max_levels {
                break;
            }
            if !visited.insert(referrer_id.clone()) {
                warn!("Referral cycle detected at user {}", referrer_id);
                break;
            }
            let Some(referrer) = Self::load_user(store, &referrer_id).await? else {
                break;
            };
            next = referrer.referred_by.clone();
            chain.push(referrer);
        }
        Ok(chain)
    }

    async fn load_user<S: LedgerStore>(store: &S, user_id: &str) -> LedgerResult<Option<User>> {
        match store.get(collections::USERS, user_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Best-effort notification document.
    async fn notify<S: LedgerStore>(store: &S, user_id: &str, title: &str, body: &str) {
        let note = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            read: false,
            created_at: store.server_time(),
        };
        let doc = match serde_json::to_value(&note) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Notification encoding failed: {}", e);
                return;
            }
        };
        if let Err(e) = store.create(collections::NOTIFICATIONS, &note.id, doc).await {
            warn!("Notification for {} not delivered: {}", user_id, e);
        }
    }
}

/// Count of Referral_Bonus transactions from `referral_user_id` to
/// `referrer_id`, for assertions and admin views.
pub async fn bonus_count<S: LedgerStore>(
    store: &S,
    referrer_id: &str,
    referral_user_id: &str,
) -> LedgerResult<usize> {
    let docs = store
        .query(
            collections::TRANSACTIONS,
            &[
                Filter::eq("user_id", referrer_id),
                Filter::eq("tx_type", Value::from("Referral_Bonus")),
                Filter::eq("referral_user_id", referral_user_id),
            ],
        )
        .await?;
    Ok(docs.len())
}
