// Milestone Reward Engine
//
// A ladder of referral-count rewards that must be claimed strictly in
// order. A tier only becomes claimable once every lower tier is claimed,
// no matter how far the referral count has run ahead, and a claimed tier
// can never be claimed again.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

use crate::catalog::{self, Milestone};
use crate::error::{LedgerResult, OpResult, StoreError};
use crate::ledger::Ledger;
use crate::models::collections;
use crate::models::{MilestoneClaim, MilestoneClaimStatus, TransactionType, User};
use crate::store::{Filter, LedgerStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierState {
    Locked,
    Claimable,
    Claimed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub id: &'static str,
    pub target: i64,
    pub reward: i64,
    pub state: TierState,
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneReport {
    pub valid_referrals: i64,
    pub tiers: Vec<TierStatus>,
    /// Smallest target the referral count has not reached yet; `None` once
    /// every tier is reached.
    pub next_target: Option<i64>,
}

pub struct Milestones;

impl Milestones {
    /// Direct referrals that both deposited and own at least one product.
    /// O(referrals) fan-out of product lookups; fine at this scale.
    pub async fn valid_referral_count<S: LedgerStore>(
        store: &S,
        user_id: &str,
    ) -> LedgerResult<i64> {
        let referrals = store
            .query(
                collections::USERS,
                &[Filter::eq("referred_by", user_id)],
            )
            .await?;

        let mut count = 0;
        for doc in referrals {
            let referral: User = doc.decode()?;
            if !referral.has_deposited {
                continue;
            }
            let products = store
                .query(
                    collections::PURCHASED_PRODUCTS,
                    &[Filter::eq("user_id", referral.id.as_str())],
                )
                .await?;
            if !products.is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Claimed / claimable / locked per tier, in ladder order.
    pub async fn status<S: LedgerStore>(
        store: &S,
        user_id: &str,
    ) -> LedgerResult<MilestoneReport> {
        let valid = Self::valid_referral_count(store, user_id).await?;
        let claimed = Self::claimed_targets(store, user_id).await?;

        let mut tiers = Vec::with_capacity(catalog::MILESTONES.len());
        let mut lower_all_claimed = true;
        for tier in catalog::MILESTONES {
            let state = if claimed.contains(&tier.target) {
                TierState::Claimed
            } else if lower_all_claimed && valid >= tier.target {
                TierState::Claimable
            } else {
                TierState::Locked
            };
            if state != TierState::Claimed {
                lower_all_claimed = false;
            }
            tiers.push(TierStatus {
                id: tier.id,
                target: tier.target,
                reward: tier.reward,
                state,
            });
        }

        let next_target = catalog::MILESTONES
            .iter()
            .map(|t| t.target)
            .find(|target| valid < *target);

        Ok(MilestoneReport {
            valid_referrals: valid,
            tiers,
            next_target,
        })
    }

    /// Claim one tier. Re-validates the whole chain server-side: the tier
    /// exists, is not yet claimed, every lower tier is claimed, and the
    /// referral count covers the target. Replay prevention is the
    /// deterministic claim document id; a raced duplicate loses the create.
    pub async fn claim<S: LedgerStore>(
        store: &S,
        user_id: &str,
        target: i64,
    ) -> LedgerResult<OpResult> {
        let Some(tier) = Self::tier_by_target(target) else {
            return Ok(OpResult::rejected("Unknown milestone"));
        };

        let claimed = Self::claimed_targets(store, user_id).await?;
        if claimed.contains(&target) {
            return Ok(OpResult::rejected("Milestone already claimed"));
        }
        let lower_unclaimed = catalog::MILESTONES
            .iter()
            .any(|t| t.target < target && !claimed.contains(&t.target));
        if lower_unclaimed {
            return Ok(OpResult::rejected(
                "Lower milestones must be claimed first",
            ));
        }
        let valid = Self::valid_referral_count(store, user_id).await?;
        if valid < target {
            return Ok(OpResult::rejected("Not enough valid referrals"));
        }

        let claim = MilestoneClaim {
            id: MilestoneClaim::doc_id(user_id, target),
            user_id: user_id.to_string(),
            target,
            reward: tier.reward,
            status: MilestoneClaimStatus::Claimed,
            claimed_at: store.server_time(),
        };
        match store
            .create(
                collections::REFERRAL_REWARDS,
                &claim.id,
                serde_json::to_value(&claim)?,
            )
            .await
        {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_, _)) => {
                return Ok(OpResult::rejected("Milestone already claimed"));
            }
            Err(e) => return Err(e.into()),
        }

        let description = format!("Milestone reward: {} valid referrals", target);
        Ledger::credit(
            store,
            user_id,
            tier.reward,
            TransactionType::ReferralBonus,
            &description,
            None,
        )
        .await?;
        info!(
            "User {} claimed milestone {} for {}",
            user_id, target, tier.reward
        );
        Ok(OpResult::ok(format!("Reward credited: {}", tier.reward)))
    }

    fn tier_by_target(target: i64) -> Option<&'static Milestone> {
        catalog::MILESTONES.iter().find(|t| t.target == target)
    }

    async fn claimed_targets<S: LedgerStore>(
        store: &S,
        user_id: &str,
    ) -> LedgerResult<HashSet<i64>> {
        let docs = store
            .query(
                collections::REFERRAL_REWARDS,
                &[
                    Filter::eq("user_id", user_id),
                    Filter::eq("status", Value::from("claimed")),
                ],
            )
            .await?;
        let mut targets = HashSet::new();
        for doc in docs {
            let claim: MilestoneClaim = doc.decode()?;
            targets.insert(claim.target);
        }
        Ok(targets)
    }
}
