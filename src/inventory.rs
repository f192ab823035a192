// Inventory Manager
//
// Tracks purchased-unit counts for the limited plan families. One document
// per family in `product_inventory`, mapping plan id -> {purchased, total}.
// The persisted quantity is the purchase count, not the remainder, so an
// administrative change of `total` never needs a compensating write here.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::catalog;
use crate::error::{LedgerResult, StoreError};
use crate::models::collections;
use crate::models::{InventoryEntry, PlanType};
use crate::store::{Guard, LedgerStore};

const LIMITED_TYPES: [PlanType; 2] = [PlanType::Special, PlanType::Premium];

pub struct Inventory;

impl Inventory {
    /// Seed inventory documents for every limited plan family. Idempotent:
    /// an existing document is left untouched, including under a concurrent
    /// initialize racing on the same key.
    pub async fn initialize<S: LedgerStore>(store: &S) -> LedgerResult<()> {
        for plan_type in LIMITED_TYPES {
            let Some(key) = plan_type.inventory_key() else {
                continue;
            };
            if store
                .get(collections::PRODUCT_INVENTORY, key)
                .await?
                .is_some()
            {
                continue;
            }
            let mut doc = serde_json::Map::new();
            for plan in catalog::limited_plans(plan_type) {
                let total = plan.stock.unwrap_or(0);
                doc.insert(
                    plan.id.to_string(),
                    json!({ "purchased": 0, "total": total }),
                );
            }
            match store
                .create(collections::PRODUCT_INVENTORY, key, Value::Object(doc))
                .await
            {
                Ok(()) => info!("Seeded {} inventory", key),
                // Lost the init race; the winner's seed stands
                Err(StoreError::AlreadyExists(_, _)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Whether the plan still has unsold units. Unknown plans and missing
    /// records read as unavailable.
    pub async fn is_available<S: LedgerStore>(
        store: &S,
        plan_id: &str,
        plan_type: PlanType,
    ) -> LedgerResult<bool> {
        let Some(key) = plan_type.inventory_key() else {
            return Ok(true);
        };
        let Some(doc) = store.get(collections::PRODUCT_INVENTORY, key).await? else {
            return Ok(false);
        };
        let Some(entry) = doc.get(plan_id) else {
            return Ok(false);
        };
        let entry: InventoryEntry = serde_json::from_value(entry.clone())?;
        Ok(entry.purchased < entry.total)
    }

    /// Consume one unit of the plan's stock. A single guarded increment at
    /// the store, so concurrent purchases can never push `purchased` past
    /// `total`. Returns false without mutating when the record is missing,
    /// the plan unknown, or the plan sold out.
    pub async fn increase_purchased<S: LedgerStore>(
        store: &S,
        plan_id: &str,
        plan_type: PlanType,
    ) -> LedgerResult<bool> {
        let Some(key) = plan_type.inventory_key() else {
            return Ok(false);
        };
        let purchased_field = format!("{}.purchased", plan_id);
        let total_field = format!("{}.total", plan_id);
        let result = store
            .increment_if(
                collections::PRODUCT_INVENTORY,
                key,
                &purchased_field,
                1,
                Guard::lt_field(&purchased_field, &total_field),
            )
            .await;
        match result {
            Ok(applied) => {
                if !applied {
                    warn!("Inventory increment refused for {} ({})", plan_id, key);
                }
                Ok(applied)
            }
            Err(StoreError::NotFound(_, _)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Administrative rollback: zero every purchase count of a family.
    pub async fn restore<S: LedgerStore>(store: &S, plan_type: PlanType) -> LedgerResult<()> {
        let Some(key) = plan_type.inventory_key() else {
            return Ok(());
        };
        let Some(doc) = store.get(collections::PRODUCT_INVENTORY, key).await? else {
            return Ok(());
        };
        let mut fields = serde_json::Map::new();
        if let Value::Object(entries) = doc {
            for plan_id in entries.keys() {
                fields.insert(format!("{}.purchased", plan_id), json!(0));
            }
        }
        store
            .patch(collections::PRODUCT_INVENTORY, key, Value::Object(fields))
            .await?;
        info!("Restored {} inventory", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = MemoryStore::new();
        Inventory::initialize(&store).await.unwrap();

        // Burn a unit, then re-run initialize a few times
        assert!(
            Inventory::increase_purchased(&store, "special-1", PlanType::Special)
                .await
                .unwrap()
        );
        for _ in 0..3 {
            Inventory::initialize(&store).await.unwrap();
        }

        let doc = store
            .get(collections::PRODUCT_INVENTORY, "special")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["special-1"]["purchased"], 1);
    }

    #[tokio::test]
    async fn test_sold_out_never_mutates() {
        let store = MemoryStore::new();
        store
            .create(
                collections::PRODUCT_INVENTORY,
                "premium",
                json!({ "premium-1": { "purchased": 0, "total": 2 } }),
            )
            .await
            .unwrap();

        assert!(Inventory::increase_purchased(&store, "premium-1", PlanType::Premium)
            .await
            .unwrap());
        assert!(Inventory::increase_purchased(&store, "premium-1", PlanType::Premium)
            .await
            .unwrap());
        // Sold out now
        for _ in 0..5 {
            assert!(!Inventory::increase_purchased(&store, "premium-1", PlanType::Premium)
                .await
                .unwrap());
        }
        assert!(!Inventory::is_available(&store, "premium-1", PlanType::Premium)
            .await
            .unwrap());

        let doc = store
            .get(collections::PRODUCT_INVENTORY, "premium")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["premium-1"]["purchased"], 2);
    }

    #[tokio::test]
    async fn test_unknown_plan_and_missing_record() {
        let store = MemoryStore::new();
        // No inventory documents at all
        assert!(!Inventory::increase_purchased(&store, "special-1", PlanType::Special)
            .await
            .unwrap());
        assert!(!Inventory::is_available(&store, "special-1", PlanType::Special)
            .await
            .unwrap());

        Inventory::initialize(&store).await.unwrap();
        // Known family, unknown plan id
        assert!(!Inventory::increase_purchased(&store, "special-99", PlanType::Special)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_purchases_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(
                collections::PRODUCT_INVENTORY,
                "premium",
                json!({ "premium-3": { "purchased": 0, "total": 30 } }),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                Inventory::increase_purchased(&*store, "premium-3", PlanType::Premium)
                    .await
                    .unwrap()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 30);
        let doc = store
            .get(collections::PRODUCT_INVENTORY, "premium")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["premium-3"]["purchased"], 30);
    }

    #[tokio::test]
    async fn test_restore_zeroes_family() {
        let store = MemoryStore::new();
        Inventory::initialize(&store).await.unwrap();
        for _ in 0..4 {
            Inventory::increase_purchased(&store, "special-1", PlanType::Special)
                .await
                .unwrap();
        }

        Inventory::restore(&store, PlanType::Special).await.unwrap();
        let doc = store
            .get(collections::PRODUCT_INVENTORY, "special")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["special-1"]["purchased"], 0);
        assert_eq!(doc["special-1"]["total"], 500);
    }
}
