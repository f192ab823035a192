// Product Lifecycle Engine
//
// Creates purchased-product records and advances them Active -> Completed.
// Special plans trickle their daily earning and return the principal at
// maturity; Basic and Premium accrue silently and pay the whole total at
// maturity. The `status` flip is a guarded patch, so the expiry sweep and a
// manual claim can race on the same product and exactly one of them settles
// it.

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{self, Plan};
use crate::error::{LedgerResult, OpResult};
use crate::inventory::Inventory;
use crate::ledger::Ledger;
use crate::models::collections;
use crate::models::{
    PlanType, ProductStatus, PurchasedProduct, TaskDoc, TransactionType,
};
use crate::store::{Filter, Guard, LedgerStore};

/// Tally of one sweep invocation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub settled: usize,
    pub credited: i64,
}

/// Final payout at cycle end. Special already distributed its profit day by
/// day, so only the principal comes back; Basic and Premium pay principal
/// plus all profit in one lump.
fn final_payout(product: &PurchasedProduct) -> i64 {
    match product.plan_type {
        PlanType::Special => product.price,
        PlanType::Basic | PlanType::Premium => product.total_earning,
    }
}

pub struct Lifecycle;

impl Lifecycle {
    /// Purchase `plan_id` for a user.
    ///
    /// Step order matters: debit, record, product create, then inventory
    /// and the recurring-earning task hook. A product-create failure
    /// refunds the debit and aborts; inventory or task failures after the
    /// product exists are downgraded to warnings — the user keeps the
    /// product and the bookkeeping gap is reported instead of unwound.
    pub async fn purchase<S: LedgerStore>(
        store: &S,
        user_id: &str,
        plan_id: &str,
    ) -> LedgerResult<OpResult> {
        let Some(plan) = catalog::plan_by_id(plan_id) else {
            return Ok(OpResult::rejected("Unknown plan"));
        };
        if store.get(collections::USERS, user_id).await?.is_none() {
            return Ok(OpResult::rejected("User not found"));
        }
        if plan.plan_type.inventory_key().is_some()
            && !Inventory::is_available(store, plan.id, plan.plan_type).await?
        {
            return Ok(OpResult::rejected("This plan is sold out"));
        }

        let description = format!("Investment in {}", plan.name);
        let debited = Ledger::try_debit(
            store,
            user_id,
            plan.price,
            TransactionType::Investment,
            &description,
        )
        .await?;
        if debited.is_none() {
            return Ok(OpResult::rejected("Insufficient balance"));
        }

        let product = match Self::create_product(store, user_id, plan).await {
            Ok(product) => product,
            Err(e) => {
                // The debit already landed; put the money back before
                // surfacing the failure.
                error!("Product creation failed for user {}: {}", user_id, e);
                if let Err(refund_err) = Ledger::refund(store, user_id, plan.price).await {
                    error!(
                        "Refund after failed purchase also failed for user {}: {}",
                        user_id, refund_err
                    );
                }
                return Err(e);
            }
        };

        let mut result = OpResult::ok(format!("Purchased {}", plan.name));

        if plan.plan_type.inventory_key().is_some() {
            match Inventory::increase_purchased(store, plan.id, plan.plan_type).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        "Inventory count not updated for {} after purchase {}",
                        plan.id, product.id
                    );
                    result = result.warn("Inventory count could not be updated");
                }
                Err(e) => {
                    error!("Inventory update failed for {}: {}", plan.id, e);
                    result = result.warn("Inventory count could not be updated");
                }
            }
        }

        let task = TaskDoc {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            kind: "daily_earning".to_string(),
            created_at: store.server_time(),
        };
        match serde_json::to_value(&task) {
            Ok(doc) => {
                if let Err(e) = store.create(collections::TASKS, &task.id, doc).await {
                    error!("Task hook creation failed for {}: {}", product.id, e);
                    result = result.warn("Recurring task could not be scheduled");
                }
            }
            Err(e) => {
                error!("Task hook encoding failed for {}: {}", product.id, e);
                result = result.warn("Recurring task could not be scheduled");
            }
        }

        info!(
            "User {} purchased {} (product {})",
            user_id, plan.id, product.id
        );
        Ok(result)
    }

    async fn create_product<S: LedgerStore>(
        store: &S,
        user_id: &str,
        plan: &Plan,
    ) -> LedgerResult<PurchasedProduct> {
        let now = store.server_time();
        let product = PurchasedProduct {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            plan_id: plan.id.to_string(),
            plan_name: plan.name.to_string(),
            plan_type: plan.plan_type,
            price: plan.price,
            daily_earning: plan.daily_income,
            total_earning: plan.total_return,
            cycle_days: plan.cycle_days,
            start_date: now,
            end_date: now + chrono::Duration::days(plan.cycle_days),
            last_payout_date: None,
            status: ProductStatus::Active,
        };
        store
            .create(
                collections::PURCHASED_PRODUCTS,
                &product.id,
                serde_json::to_value(&product)?,
            )
            .await?;
        Ok(product)
    }

    /// Credit the daily earning of every Special product that has a full
    /// elapsed day since its last payout (or its start). One earning per
    /// invocation per product; a dated claim document makes the payout
    /// idempotent within a calendar day even if two sweeps race.
    pub async fn sweep_daily_payouts<S: LedgerStore>(store: &S) -> LedgerResult<SweepReport> {
        let now = store.server_time();
        let docs = store
            .query(
                collections::PURCHASED_PRODUCTS,
                &[Filter::eq("status", "Active")],
            )
            .await?;

        let mut report = SweepReport {
            scanned: docs.len(),
            ..Default::default()
        };
        for doc in docs {
            let product: PurchasedProduct = match doc.decode() {
                Ok(p) => p,
                Err(e) => {
                    error!("Skipping undecodable product document: {}", e);
                    continue;
                }
            };
            if product.plan_type != PlanType::Special || now >= product.end_date {
                continue;
            }
            let since = product.last_payout_date.unwrap_or(product.start_date);
            if (now - since) < chrono::Duration::days(1) {
                continue;
            }

            if let Err(e) = Self::pay_daily(store, &product, now).await {
                // Isolate per-product failures; the rest of the sweep goes on
                error!("Daily payout failed for product {}: {}", product.id, e);
                continue;
            }
            report.settled += 1;
            report.credited += product.daily_earning;
        }
        if report.settled > 0 {
            info!(
                "Daily sweep: {} of {} products paid, {} credited",
                report.settled, report.scanned, report.credited
            );
        }
        Ok(report)
    }

    async fn pay_daily<S: LedgerStore>(
        store: &S,
        product: &PurchasedProduct,
        now: chrono::DateTime<chrono::Utc>,
    ) -> LedgerResult<bool> {
        // Dated dedup record; a concurrent sweep loses the create and skips
        let date_key = now.format("%Y-%m-%d").to_string();
        let claim_id = format!("{}_{}", product.id, date_key);
        let claim = json!({
            "id": claim_id,
            "product_id": product.id,
            "user_id": product.user_id,
            "date_key": date_key,
            "created_at": now,
        });
        match store.create(collections::CLAIMS, &claim_id, claim).await {
            Ok(()) => {}
            Err(crate::error::StoreError::AlreadyExists(_, _)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let description = format!("Daily earning from {}", product.plan_name);
        Ledger::credit(
            store,
            &product.user_id,
            product.daily_earning,
            TransactionType::Deposit,
            &description,
            None,
        )
        .await?;
        store
            .patch(
                collections::PURCHASED_PRODUCTS,
                &product.id,
                json!({ "last_payout_date": now }),
            )
            .await?;
        Ok(true)
    }

    /// Complete every Active product past its end date and credit its final
    /// payout. The guarded status flip is what makes this safe against a
    /// concurrent manual claim: whoever flips first pays, the other sees
    /// Completed and does nothing.
    pub async fn sweep_expirations<S: LedgerStore>(store: &S) -> LedgerResult<SweepReport> {
        let now = store.server_time();
        let docs = store
            .query(
                collections::PURCHASED_PRODUCTS,
                &[Filter::eq("status", "Active")],
            )
            .await?;

        let mut report = SweepReport {
            scanned: docs.len(),
            ..Default::default()
        };
        for doc in docs {
            let product: PurchasedProduct = match doc.decode() {
                Ok(p) => p,
                Err(e) => {
                    error!("Skipping undecodable product document: {}", e);
                    continue;
                }
            };
            if now < product.end_date {
                continue;
            }
            match Self::settle(store, &product).await {
                Ok(Some(amount)) => {
                    report.settled += 1;
                    report.credited += amount;
                }
                Ok(None) => {} // lost the race, already completed
                Err(e) => {
                    error!("Expiry settlement failed for product {}: {}", product.id, e);
                }
            }
        }
        if report.settled > 0 {
            info!(
                "Expiry sweep: {} of {} products completed, {} credited",
                report.settled, report.scanned, report.credited
            );
        }
        Ok(report)
    }

    /// Flip the product to Completed and credit its final payout. Returns
    /// the credited amount, or `None` if someone else completed it first.
    async fn settle<S: LedgerStore>(
        store: &S,
        product: &PurchasedProduct,
    ) -> LedgerResult<Option<i64>> {
        let flipped = store
            .patch_if(
                collections::PURCHASED_PRODUCTS,
                &product.id,
                Guard::eq("status", "Active"),
                json!({ "status": "Completed" }),
            )
            .await?;
        if !flipped {
            return Ok(None);
        }

        let amount = final_payout(product);
        let description = format!("Cycle completed: {}", product.plan_name);
        Ledger::credit(
            store,
            &product.user_id,
            amount,
            TransactionType::Deposit,
            &description,
            None,
        )
        .await?;
        Ok(Some(amount))
    }

    /// Manual claim of a matured product's returns. Races cleanly with the
    /// expiry sweep via the same status guard.
    pub async fn claim_returns<S: LedgerStore>(
        store: &S,
        user_id: &str,
        product_id: &str,
    ) -> LedgerResult<OpResult> {
        let Some(doc) = store.get(collections::PURCHASED_PRODUCTS, product_id).await? else {
            return Ok(OpResult::rejected("Product not found"));
        };
        let product: PurchasedProduct = serde_json::from_value(doc)?;
        if product.user_id != user_id {
            return Ok(OpResult::rejected("Product not found"));
        }
        if store.server_time() < product.end_date {
            return Ok(OpResult::rejected("Plan has not matured yet"));
        }
        match Self::settle(store, &product).await? {
            Some(amount) => Ok(OpResult::ok(format!("Returns credited: {}", amount))),
            None => Ok(OpResult::rejected("Returns already claimed")),
        }
    }

    /// A user's purchased products. Missing collection reads as empty.
    pub async fn products_for<S: LedgerStore>(
        store: &S,
        user_id: &str,
    ) -> LedgerResult<Vec<PurchasedProduct>> {
        let docs = store
            .query(
                collections::PURCHASED_PRODUCTS,
                &[Filter::eq("user_id", user_id)],
            )
            .await?;
        let mut products = Vec::with_capacity(docs.len());
        for doc in docs {
            products.push(doc.decode()?);
        }
        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testutil::seed_user;
    use chrono::{Duration, Utc};

    async fn balance_of(store: &MemoryStore, user_id: &str) -> i64 {
        store
            .get(collections::USERS, user_id)
            .await
            .unwrap()
            .unwrap()["balance"]
            .as_i64()
            .unwrap()
    }

    #[tokio::test]
    async fn test_purchase_requires_balance() {
        let store = MemoryStore::new();
        Inventory::initialize(&store).await.unwrap();
        let uid = seed_user(&store, "poor", 100, None).await;

        let result = Lifecycle::purchase(&store, &uid, "basic-1").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Insufficient balance");
        assert_eq!(balance_of(&store, &uid).await, 100);
        assert!(Lifecycle::products_for(&store, &uid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purchase_creates_product_and_bumps_inventory() {
        let store = MemoryStore::new();
        Inventory::initialize(&store).await.unwrap();
        let uid = seed_user(&store, "alice", 5_000, None).await;

        let result = Lifecycle::purchase(&store, &uid, "special-1").await.unwrap();
        assert!(result.success, "{}", result.message);
        assert!(result.warnings.is_empty());
        assert_eq!(balance_of(&store, &uid).await, 2_000);

        let products = Lifecycle::products_for(&store, &uid).await.unwrap();
        assert_eq!(products.len(), 1);
        let product = &products[0];
        assert_eq!(product.plan_id, "special-1");
        assert_eq!(product.status, ProductStatus::Active);
        assert_eq!(product.end_date, product.start_date + Duration::days(365));
        assert_eq!(product.daily_earning, 117);

        let inv = store
            .get(collections::PRODUCT_INVENTORY, "special")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inv["special-1"]["purchased"], 1);

        let txs = Ledger::transactions_for(&store, &uid).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].tx_type, TransactionType::Investment);
        assert_eq!(txs[0].amount, 3_000);
    }

    #[tokio::test]
    async fn test_purchase_rejected_when_sold_out() {
        let store = MemoryStore::new();
        store
            .create(
                collections::PRODUCT_INVENTORY,
                "special",
                json!({ "special-1": { "purchased": 500, "total": 500 } }),
            )
            .await
            .unwrap();
        let uid = seed_user(&store, "late", 10_000, None).await;

        let result = Lifecycle::purchase(&store, &uid, "special-1").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "This plan is sold out");
        assert_eq!(balance_of(&store, &uid).await, 10_000);
    }

    #[tokio::test]
    async fn test_special_lifecycle_full_year() {
        let store = MemoryStore::frozen_at(Utc::now());
        Inventory::initialize(&store).await.unwrap();
        let uid = seed_user(&store, "annual", 3_000, None).await;

        let result = Lifecycle::purchase(&store, &uid, "special-1").await.unwrap();
        assert!(result.success);
        assert_eq!(balance_of(&store, &uid).await, 0);

        let mut daily_credits = 0i64;
        for day in 1..=365 {
            store.advance(Duration::days(1));
            let report = Lifecycle::sweep_daily_payouts(&store).await.unwrap();
            if day < 365 {
                assert_eq!(report.settled, 1, "day {} should pay", day);
                assert_eq!(report.credited, 117);
            } else {
                // Expiry day: the daily path no longer applies
                assert_eq!(report.settled, 0);
            }
            daily_credits += report.credited;

            // Re-running the sweep on the same day must not pay again
            let again = Lifecycle::sweep_daily_payouts(&store).await.unwrap();
            assert_eq!(again.settled, 0, "day {} double-paid", day);
        }
        assert_eq!(daily_credits, 117 * 364);

        let report = Lifecycle::sweep_expirations(&store).await.unwrap();
        assert_eq!(report.settled, 1);
        assert_eq!(report.credited, 3_000, "Special returns principal only");

        assert_eq!(balance_of(&store, &uid).await, 3_000 + 117 * 364);
        let products = Lifecycle::products_for(&store, &uid).await.unwrap();
        assert_eq!(products[0].status, ProductStatus::Completed);

        // A later sweep finds nothing Active
        let report = Lifecycle::sweep_expirations(&store).await.unwrap();
        assert_eq!(report.settled, 0);
    }

    #[tokio::test]
    async fn test_premium_pays_lump_sum_at_maturity() {
        let store = MemoryStore::frozen_at(Utc::now());
        Inventory::initialize(&store).await.unwrap();
        let uid = seed_user(&store, "prem", 10_000, None).await;
        Lifecycle::purchase(&store, &uid, "premium-1").await.unwrap();

        // No daily trickle for Premium
        store.advance(Duration::days(10));
        let report = Lifecycle::sweep_daily_payouts(&store).await.unwrap();
        assert_eq!(report.settled, 0);

        store.advance(Duration::days(80));
        let report = Lifecycle::sweep_expirations(&store).await.unwrap();
        assert_eq!(report.settled, 1);
        assert_eq!(report.credited, 37_000);
        assert_eq!(balance_of(&store, &uid).await, 37_000);
    }

    #[tokio::test]
    async fn test_claim_returns_before_maturity_rejected() {
        let store = MemoryStore::frozen_at(Utc::now());
        Inventory::initialize(&store).await.unwrap();
        let uid = seed_user(&store, "eager", 500, None).await;
        Lifecycle::purchase(&store, &uid, "basic-1").await.unwrap();
        let product_id = Lifecycle::products_for(&store, &uid).await.unwrap()[0]
            .id
            .clone();

        store.advance(Duration::days(29));
        let result = Lifecycle::claim_returns(&store, &uid, &product_id)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Plan has not matured yet");
    }

    #[tokio::test]
    async fn test_sweep_and_claim_settle_exactly_once() {
        let store = MemoryStore::frozen_at(Utc::now());
        Inventory::initialize(&store).await.unwrap();
        let uid = seed_user(&store, "racer", 500, None).await;
        Lifecycle::purchase(&store, &uid, "basic-1").await.unwrap();
        let product_id = Lifecycle::products_for(&store, &uid).await.unwrap()[0]
            .id
            .clone();
        store.advance(Duration::days(30));

        let (sweep, claim) = tokio::join!(
            Lifecycle::sweep_expirations(&store),
            Lifecycle::claim_returns(&store, &uid, &product_id),
        );
        let sweep = sweep.unwrap();
        let claim = claim.unwrap();

        // Exactly one side pays, whichever flipped the status first
        assert!(
            (sweep.settled == 1) ^ claim.success,
            "sweep settled {} and claim success {}",
            sweep.settled,
            claim.success
        );
        if !claim.success {
            assert_eq!(claim.message, "Returns already claimed");
        }
        assert_eq!(balance_of(&store, &uid).await, 800);

        // And the loser's retry stays rejected
        let retry = Lifecycle::claim_returns(&store, &uid, &product_id)
            .await
            .unwrap();
        assert!(!retry.success);
        assert_eq!(retry.message, "Returns already claimed");
    }

    #[tokio::test]
    async fn test_claim_returns_wrong_owner() {
        let store = MemoryStore::frozen_at(Utc::now());
        Inventory::initialize(&store).await.unwrap();
        let owner = seed_user(&store, "owner", 500, None).await;
        let thief = seed_user(&store, "thief", 0, None).await;
        Lifecycle::purchase(&store, &owner, "basic-1").await.unwrap();
        let product_id = Lifecycle::products_for(&store, &owner).await.unwrap()[0]
            .id
            .clone();
        store.advance(Duration::days(31));

        let result = Lifecycle::claim_returns(&store, &thief, &product_id)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Product not found");
    }
}
