// HTTP handlers
//
// Thin axum layer over the engines. Domain rejections ride the OpResult
// envelope with a 200; only store/codec failures become 500s.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog;
use crate::error::{LedgerError, OpResult};
use crate::inventory::Inventory;
use crate::ledger::Ledger;
use crate::lifecycle::{Lifecycle, SweepReport};
use crate::milestone::{MilestoneReport, Milestones};
use crate::models::collections;
use crate::models::{PlanType, PurchasedProduct, Transaction, TransactionType, User};
use crate::referral::Referrals;
use crate::store::{Filter, Guard, LedgerStore};
use crate::AppState;

fn internal(context: &'static str) -> impl Fn(LedgerError) -> StatusCode {
    move |e| {
        error!("{}: {}", context, e);
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub user_id: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: String,
    pub plan_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimReturnsRequest {
    pub user_id: String,
    pub product_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MilestoneClaimRequest {
    pub user_id: String,
    pub target: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdminAdjustRequest {
    pub user_id: String,
    pub amount: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RestoreInventoryRequest {
    pub product_type: String,
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Static plan catalog
pub async fn list_plans() -> Json<Vec<catalog::Plan>> {
    Json(catalog::all_plans().copied().collect())
}

fn generate_referral_code() -> String {
    // No easily-confused characters (0/O, 1/I)
    const CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Register a new user, optionally linked to a referrer by code.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, StatusCode> {
    let store = &state.store;

    let referred_by = match &req.referral_code {
        Some(code) => {
            let found = store
                .query(collections::USERS, &[Filter::eq("referral_code", code.as_str())])
                .await
                .map_err(|e| {
                    error!("Referral code lookup failed: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?;
            match found.first() {
                Some(doc) => Some(doc.id.clone()),
                None => {
                    return Ok(Json(RegisterResponse {
                        success: false,
                        message: "Invalid referral code".to_string(),
                        user: None,
                    }))
                }
            }
        }
        None => None,
    };

    // A fresh code per user; regenerate on the unlikely collision
    let mut referral_code = generate_referral_code();
    for _ in 0..5 {
        let taken = store
            .query(
                collections::USERS,
                &[Filter::eq("referral_code", referral_code.as_str())],
            )
            .await
            .map_err(|e| {
                error!("Referral code check failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        if taken.is_empty() {
            break;
        }
        referral_code = generate_referral_code();
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username,
        balance: 0,
        has_deposited: false,
        referral_code,
        referred_by: referred_by.clone(),
        total_referrals: 0,
        referral_earnings: 0,
        created_at: store.server_time(),
    };
    let doc = serde_json::to_value(&user).map_err(|e| {
        error!("User encoding failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    store
        .create(collections::USERS, &user.id, doc)
        .await
        .map_err(|e| {
            error!("User creation failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if let Some(referrer_id) = &referred_by {
        if let Err(e) = store
            .increment(collections::USERS, referrer_id, "total_referrals", 1)
            .await
        {
            warn!("Referral counter not updated for {}: {}", referrer_id, e);
        }
        if state.welcome_bonus_enabled {
            Referrals::process_welcome_bonus(store, &user.id, referrer_id).await;
        }
    }

    info!("Registered user {} ({})", user.username, user.id);
    Ok(Json(RegisterResponse {
        success: true,
        message: "Registered".to_string(),
        user: Some(user),
    }))
}

/// Credit a deposit. The first qualifying deposit flips `has_deposited`
/// atomically and triggers the multi-level referral bonus.
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<OpResult>, StatusCode> {
    let store = &state.store;
    if req.amount <= 0 {
        return Ok(Json(OpResult::rejected("Deposit amount must be positive")));
    }
    if store
        .get(collections::USERS, &req.user_id)
        .await
        .map_err(|e| {
            error!("User lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .is_none()
    {
        return Ok(Json(OpResult::rejected("User not found")));
    }

    Ledger::credit(
        store,
        &req.user_id,
        req.amount,
        TransactionType::Deposit,
        "Deposit",
        None,
    )
    .await
    .map_err(internal("Deposit credit failed"))?;

    let first_deposit = store
        .patch_if(
            collections::USERS,
            &req.user_id,
            Guard::eq("has_deposited", false),
            serde_json::json!({ "has_deposited": true }),
        )
        .await
        .map_err(|e| {
            error!("Deposit gate failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if first_deposit {
        let payouts = Referrals::process_deposit_referral_bonus(store, &req.user_id, req.amount)
            .await
            .map_err(internal("Referral bonus processing failed"))?;
        if !payouts.is_empty() {
            info!(
                "First deposit by {} paid {} referral bonus level(s)",
                req.user_id,
                payouts.len()
            );
        }
    }

    Ok(Json(OpResult::ok("Deposit credited")))
}

/// Withdraw from balance.
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<OpResult>, StatusCode> {
    if req.amount <= 0 {
        return Ok(Json(OpResult::rejected(
            "Withdrawal amount must be positive",
        )));
    }
    let debited = Ledger::try_debit(
        &state.store,
        &req.user_id,
        req.amount,
        TransactionType::Withdrawal,
        "Withdrawal",
    )
    .await
    .map_err(internal("Withdrawal failed"))?;
    match debited {
        Some(_) => Ok(Json(OpResult::ok("Withdrawal recorded"))),
        None => Ok(Json(OpResult::rejected("Insufficient balance"))),
    }
}

/// Purchase an investment plan.
pub async fn purchase(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<OpResult>, StatusCode> {
    let result = Lifecycle::purchase(&state.store, &req.user_id, &req.plan_id)
        .await
        .map_err(internal("Purchase failed"))?;
    Ok(Json(result))
}

/// Manually claim a matured product's returns.
pub async fn claim_returns(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimReturnsRequest>,
) -> Result<Json<OpResult>, StatusCode> {
    let result = Lifecycle::claim_returns(&state.store, &req.user_id, &req.product_id)
        .await
        .map_err(internal("Claim failed"))?;
    Ok(Json(result))
}

/// A user's purchased products.
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<PurchasedProduct>>, StatusCode> {
    let products = Lifecycle::products_for(&state.store, &user_id)
        .await
        .map_err(internal("Product listing failed"))?;
    Ok(Json(products))
}

/// A user's transaction history, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Transaction>>, StatusCode> {
    let txs = Ledger::transactions_for(&state.store, &user_id)
        .await
        .map_err(internal("Transaction listing failed"))?;
    Ok(Json(txs))
}

/// Milestone ladder status for a user.
pub async fn milestone_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<MilestoneReport>, StatusCode> {
    let report = Milestones::status(&state.store, &user_id)
        .await
        .map_err(internal("Milestone status failed"))?;
    Ok(Json(report))
}

/// Claim a milestone reward.
pub async fn milestone_claim(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MilestoneClaimRequest>,
) -> Result<Json<OpResult>, StatusCode> {
    let result = Milestones::claim(&state.store, &req.user_id, req.target)
        .await
        .map_err(internal("Milestone claim failed"))?;
    Ok(Json(result))
}

/// Run the daily payout sweep.
pub async fn sweep_daily(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepReport>, StatusCode> {
    let report = Lifecycle::sweep_daily_payouts(&state.store)
        .await
        .map_err(internal("Daily sweep failed"))?;
    Ok(Json(report))
}

/// Run the expiration sweep.
pub async fn sweep_expired(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepReport>, StatusCode> {
    let report = Lifecycle::sweep_expirations(&state.store)
        .await
        .map_err(internal("Expiry sweep failed"))?;
    Ok(Json(report))
}

/// Administrative balance adjustment, positive or negative.
pub async fn admin_adjust(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdminAdjustRequest>,
) -> Result<Json<OpResult>, StatusCode> {
    let store = &state.store;
    if req.amount == 0 {
        return Ok(Json(OpResult::rejected("Adjustment amount must be non-zero")));
    }
    if store
        .get(collections::USERS, &req.user_id)
        .await
        .map_err(|e| {
            error!("User lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .is_none()
    {
        return Ok(Json(OpResult::rejected("User not found")));
    }

    if req.amount > 0 {
        Ledger::credit(
            store,
            &req.user_id,
            req.amount,
            TransactionType::AdminAdd,
            &req.reason,
            None,
        )
        .await
        .map_err(internal("Admin credit failed"))?;
        Ok(Json(OpResult::ok("Balance credited")))
    } else {
        let debited = Ledger::try_debit(
            store,
            &req.user_id,
            -req.amount,
            TransactionType::AdminDeduct,
            &req.reason,
        )
        .await
        .map_err(internal("Admin debit failed"))?;
        match debited {
            Some(_) => Ok(Json(OpResult::ok("Balance deducted"))),
            None => Ok(Json(OpResult::rejected("Insufficient balance"))),
        }
    }
}

/// Administrative inventory rollback for one plan family.
pub async fn admin_restore_inventory(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RestoreInventoryRequest>,
) -> Result<Json<OpResult>, StatusCode> {
    let plan_type = match req.product_type.as_str() {
        "special" => PlanType::Special,
        "premium" => PlanType::Premium,
        _ => return Ok(Json(OpResult::rejected("Unknown product type"))),
    };
    Inventory::restore(&state.store, plan_type)
        .await
        .map_err(internal("Inventory restore failed"))?;
    Ok(Json(OpResult::ok("Inventory restored")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testutil::seed_user;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            store: MemoryStore::new(),
            welcome_bonus_enabled: false,
        })
    }

    #[tokio::test]
    async fn test_deposit_gate_pays_referral_bonus_once() {
        let state = test_state();
        let referrer = seed_user(&state.store, "ref", 0, None).await;
        let user = seed_user(&state.store, "depositor", 0, Some(&referrer)).await;

        for _ in 0..2 {
            let Json(result) = deposit(
                State(Arc::clone(&state)),
                Json(AmountRequest {
                    user_id: user.clone(),
                    amount: 10_000,
                }),
            )
            .await
            .unwrap();
            assert!(result.success);
        }

        // Both deposits credited, but the referral bonus only on the first
        let doc = state
            .store
            .get(collections::USERS, &user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["balance"], 20_000);
        let doc = state
            .store
            .get(collections::USERS, &referrer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["balance"], 1_900);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_referral_code() {
        let state = test_state();
        let Json(resp) = register(
            State(Arc::clone(&state)),
            Json(RegisterRequest {
                username: "newcomer".to_string(),
                referral_code: Some("NOPE1234".to_string()),
            }),
        )
        .await
        .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.message, "Invalid referral code");
        assert!(resp.user.is_none());
    }

    #[tokio::test]
    async fn test_register_links_referrer_and_counts() {
        let state = test_state();
        let referrer = seed_user(&state.store, "ref", 0, None).await;
        let code = state
            .store
            .get(collections::USERS, &referrer)
            .await
            .unwrap()
            .unwrap()["referral_code"]
            .as_str()
            .unwrap()
            .to_string();

        let Json(resp) = register(
            State(Arc::clone(&state)),
            Json(RegisterRequest {
                username: "downstream".to_string(),
                referral_code: Some(code),
            }),
        )
        .await
        .unwrap();
        assert!(resp.success);
        let user = resp.user.unwrap();
        assert_eq!(user.referred_by.as_deref(), Some(referrer.as_str()));
        assert_eq!(user.referral_code.len(), 8);

        let doc = state
            .store
            .get(collections::USERS, &referrer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["total_referrals"], 1);
    }

    #[tokio::test]
    async fn test_admin_adjust_both_directions() {
        let state = test_state();
        let uid = seed_user(&state.store, "subject", 100, None).await;

        let Json(result) = admin_adjust(
            State(Arc::clone(&state)),
            Json(AdminAdjustRequest {
                user_id: uid.clone(),
                amount: 50,
                reason: "correction".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(result.success);

        // Deduction past the balance is refused, balance untouched
        let Json(result) = admin_adjust(
            State(Arc::clone(&state)),
            Json(AdminAdjustRequest {
                user_id: uid.clone(),
                amount: -500,
                reason: "clawback".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Insufficient balance");

        let doc = state
            .store
            .get(collections::USERS, &uid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["balance"], 150);
    }
}
