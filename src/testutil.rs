// Shared test fixtures

use uuid::Uuid;

use crate::models::collections;
use crate::models::{PlanType, ProductStatus, PurchasedProduct, User};
use crate::store::LedgerStore;

/// Create a user document and return its id.
pub async fn seed_user<S: LedgerStore>(
    store: &S,
    username: &str,
    balance: i64,
    referred_by: Option<&str>,
) -> String {
    let id = Uuid::new_v4().to_string();
    let user = User {
        id: id.clone(),
        username: username.to_string(),
        balance,
        has_deposited: false,
        referral_code: format!("T{}", &id[..7].to_uppercase()),
        referred_by: referred_by.map(str::to_string),
        total_referrals: 0,
        referral_earnings: 0,
        created_at: store.server_time(),
    };
    store
        .create(
            collections::USERS,
            &id,
            serde_json::to_value(&user).unwrap(),
        )
        .await
        .unwrap();
    id
}

/// Give a user one active product, bypassing the purchase flow.
pub async fn seed_product<S: LedgerStore>(store: &S, user_id: &str) -> String {
    let now = store.server_time();
    let product = PurchasedProduct {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        plan_id: "basic-1".to_string(),
        plan_name: "Starter".to_string(),
        plan_type: PlanType::Basic,
        price: 500,
        daily_earning: 10,
        total_earning: 800,
        cycle_days: 30,
        start_date: now,
        end_date: now + chrono::Duration::days(30),
        last_payout_date: None,
        status: ProductStatus::Active,
    };
    let id = product.id.clone();
    store
        .create(
            collections::PURCHASED_PRODUCTS,
            &id,
            serde_json::to_value(&product).unwrap(),
        )
        .await
        .unwrap();
    id
}

/// Seed `count` direct referrals of `referrer_id` that each deposited and
/// own a product, i.e. count as valid for milestones.
pub async fn seed_valid_referrals<S: LedgerStore>(store: &S, referrer_id: &str, count: usize) {
    for i in 0..count {
        let id = seed_user(store, &format!("referral-{}", i), 0, Some(referrer_id)).await;
        store
            .patch(
                collections::USERS,
                &id,
                serde_json::json!({ "has_deposited": true }),
            )
            .await
            .unwrap();
        seed_product(store, &id).await;
    }
}
