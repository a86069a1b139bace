//! User-facing failure taxonomy shared by the stores and the coordinator.
//!
//! Every public operation that can fail for a reason the user must act on
//! reports one of these variants. The coordinator translates them into
//! toast-ready messages; the UI branches on `LimitExceeded` specifically to
//! show plan-upgrade messaging, so that variant must never collapse into
//! `Transient`.

use crate::db::DatabaseError;
use crate::models::enums::{LimitCategory, PlanTier};

/// Failure classes surfaced by store and coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Resource absent, or owned by a different user (never distinguished
    /// outward — cross-user probes must not learn whether an id exists).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Plan-tier quota reached. Recoverable by upgrading, not by retrying.
    #[error("{category} limit reached for the {plan} plan ({limit})")]
    LimitExceeded {
        plan: PlanTier,
        category: LimitCategory,
        limit: i64,
    },

    /// Malformed input rejected before any store mutation was attempted.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Network/storage failure with no semantic meaning beyond "retry later".
    #[error("Temporary failure: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl SyncError {
    /// Whether the UI should present upgrade messaging for this failure.
    pub fn is_limit(&self) -> bool {
        matches!(self, SyncError::LimitExceeded { .. })
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Transient(err.to_string())
    }
}
