// Persisted document types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection names, kept in one place so engines and tests agree.
pub mod collections {
    pub const USERS: &str = "users";
    pub const TRANSACTIONS: &str = "transactions";
    pub const PURCHASED_PRODUCTS: &str = "purchased_products";
    pub const PRODUCT_INVENTORY: &str = "product_inventory";
    pub const REFERRAL_REWARDS: &str = "referral_rewards";
    pub const CLAIMS: &str = "claims";
    pub const TASKS: &str = "tasks";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// A registered user and the mutable balance the ledger funds.
///
/// `balance` is only ever mutated through atomic increments issued by the
/// ledger; `referred_by` and `referral_code` are set at registration and
/// never change. `total_referrals` and `referral_earnings` are denormalized
/// counters for display; the transaction log is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub balance: i64,
    pub has_deposited: bool,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub total_referrals: i64,
    pub referral_earnings: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanType {
    Basic,
    Special,
    Premium,
}

impl PlanType {
    /// Inventory collection key for limited plan families; Basic plans are
    /// unlimited and carry no inventory.
    pub fn inventory_key(&self) -> Option<&'static str> {
        match self {
            PlanType::Basic => None,
            PlanType::Special => Some("special"),
            PlanType::Premium => Some("premium"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    Active,
    Completed,
}

/// One investment purchase.
///
/// `end_date` is fixed at purchase time; `status` only ever moves
/// Active -> Completed, and that flip is the mutual-exclusion flag between
/// the expiry sweep and a manual claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchasedProduct {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub plan_type: PlanType,
    pub price: i64,
    pub daily_earning: i64,
    pub total_earning: i64,
    pub cycle_days: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub last_payout_date: Option<DateTime<Utc>>,
    pub status: ProductStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Investment,
    #[serde(rename = "Admin_Add")]
    AdminAdd,
    #[serde(rename = "Admin_Deduct")]
    AdminDeduct,
    #[serde(rename = "Referral_Bonus")]
    ReferralBonus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Completed,
}

/// Immutable, append-only financial record. Never patched, never deleted.
/// `referral_user_id` doubles as the dedup key for referral bonuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub tx_type: TransactionType,
    pub amount: i64,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub referral_user_id: Option<String>,
}

/// Per-plan slot counts inside a `product_inventory` document.
/// Invariant: 0 <= purchased <= total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub purchased: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneClaimStatus {
    Pending,
    Claimed,
}

/// One record per (user, milestone target). At most one `claimed` record
/// per pair; the deterministic document id enforces that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneClaim {
    pub id: String,
    pub user_id: String,
    pub target: i64,
    pub reward: i64,
    pub status: MilestoneClaimStatus,
    pub claimed_at: DateTime<Utc>,
}

impl MilestoneClaim {
    /// Deterministic id so a second claim of the same target collides.
    pub fn doc_id(user_id: &str, target: i64) -> String {
        format!("{}_{}", user_id, target)
    }
}

/// Recurring-earning hook created alongside a purchase. Consumed by an
/// external scheduler; the purchase flow only records it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDoc {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_wire_names() {
        let json = serde_json::to_value(TransactionType::ReferralBonus).unwrap();
        assert_eq!(json, "Referral_Bonus");
        let json = serde_json::to_value(TransactionType::AdminAdd).unwrap();
        assert_eq!(json, "Admin_Add");
        let back: TransactionType = serde_json::from_value(json).unwrap();
        assert_eq!(back, TransactionType::AdminAdd);
    }

    #[test]
    fn test_milestone_claim_doc_id_is_deterministic() {
        assert_eq!(MilestoneClaim::doc_id("u1", 5), "u1_5");
        assert_eq!(
            MilestoneClaim::doc_id("u1", 5),
            MilestoneClaim::doc_id("u1", 5)
        );
    }
}
