// Harvest Backend Server
// Referral-and-investment ledger API + periodic payout/expiry sweeper

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use harvest_backend::handlers;
use harvest_backend::inventory::Inventory;
use harvest_backend::lifecycle::Lifecycle;
use harvest_backend::store::MemoryStore;
use harvest_backend::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("harvest_backend=info".parse().unwrap())
                .add_directive("tower_http=warn".parse().unwrap()),
        )
        .init();

    info!("Starting Harvest Backend Server");

    // Load configuration
    let server_port = std::env::var("PORT")
        .unwrap_or_else(|_| "4000".to_string())
        .parse::<u16>()?;
    let sweep_interval_secs = std::env::var("SWEEP_INTERVAL_SECS")
        .unwrap_or_else(|_| "3600".to_string())
        .parse::<u64>()?;
    let welcome_bonus_enabled = std::env::var("WELCOME_BONUS_ENABLED")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    info!("Configuration:");
    info!("  Server Port: {}", server_port);
    info!("  Sweep Interval: {}s", sweep_interval_secs);
    info!("  Welcome Bonus: {}", welcome_bonus_enabled);

    // Initialize store and seed inventory
    let store = MemoryStore::new();
    Inventory::initialize(&store).await?;

    // Create app state
    let state = Arc::new(AppState {
        store,
        welcome_bonus_enabled,
    });

    // Start payout/expiry sweeper in background
    let sweeper_state = Arc::clone(&state);
    tokio::spawn(async move {
        info!("Starting payout sweeper...");
        let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = Lifecycle::sweep_daily_payouts(&sweeper_state.store).await {
                error!("Daily sweep error: {}", e);
            }
            if let Err(e) = Lifecycle::sweep_expirations(&sweeper_state.store).await {
                error!("Expiry sweep error: {}", e);
            }
        }
    });

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/plans", get(handlers::list_plans))
        .route("/api/register", post(handlers::register))
        .route("/api/deposit", post(handlers::deposit))
        .route("/api/withdraw", post(handlers::withdraw))
        .route("/api/purchase", post(handlers::purchase))
        .route("/api/products/claim", post(handlers::claim_returns))
        .route("/api/products/:user_id", get(handlers::list_products))
        .route("/api/transactions/:user_id", get(handlers::list_transactions))
        .route("/api/milestones/claim", post(handlers::milestone_claim))
        .route("/api/milestones/:user_id", get(handlers::milestone_status))
        .route("/api/sweep/daily", post(handlers::sweep_daily))
        .route("/api/sweep/expired", post(handlers::sweep_expired))
        .route("/api/admin/adjust", post(handlers::admin_adjust))
        .route(
            "/api/admin/inventory/restore",
            post(handlers::admin_restore_inventory),
        )
        .with_state(state)
        .layer(cors);

    // Start server
    let addr = format!("0.0.0.0:{}", server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Harvest Backend listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
