// Error types and the operation-result envelope

use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by a `LedgerStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document '{1}' already exists in collection '{0}'")]
    AlreadyExists(String, String),

    #[error("document '{1}' not found in collection '{0}'")]
    NotFound(String, String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by the ledger engines.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt document: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Outcome of a domain operation.
///
/// Precondition failures (insufficient balance, sold out, already claimed,
/// not yet eligible) are values, not errors: the caller shows `message`
/// verbatim. `warnings` carries non-fatal follow-up failures on an otherwise
/// successful operation (e.g. the inventory counter could not be bumped
/// after a purchase went through).
#[derive(Debug, Clone, Serialize)]
pub struct OpResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl OpResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}
