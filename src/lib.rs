//! Harvest backend — referral-and-investment ledger service.
//!
//! Users invest in fixed-term plans, earn daily or lump-sum payouts, and
//! earn multi-level bonuses when users they referred make their first
//! deposit. The engines live here; persistence is abstracted behind
//! [`store::LedgerStore`], with [`store::MemoryStore`] as the reference
//! backend.
//!
//! ## Module structure
//!
//! - `store`: abstract document store and the in-memory backend
//! - `models`: persisted document types
//! - `catalog`: static plan tables and the milestone ladder
//! - `inventory`: limited-plan stock accounting
//! - `ledger`: balance mutations + the append-only transaction log
//! - `lifecycle`: purchase, daily payouts, expiry, manual claims
//! - `referral`: multi-level deposit bonuses
//! - `milestone`: sequential referral-reward ladder
//! - `handlers`: HTTP endpoints

pub mod catalog;
pub mod error;
pub mod handlers;
pub mod inventory;
pub mod ledger;
pub mod lifecycle;
pub mod milestone;
pub mod models;
pub mod referral;
pub mod store;

#[cfg(test)]
pub mod testutil;

use store::MemoryStore;

/// Application state shared across handlers
pub struct AppState {
    pub store: MemoryStore,
    /// Whether registration pays the legacy flat welcome bonus to the
    /// referrer. Off by default: when enabled, the welcome transaction
    /// also satisfies the deposit-bonus dedup check for the direct
    /// referrer, so only one of the two paths should run per deployment.
    pub welcome_bonus_enabled: bool,
}
