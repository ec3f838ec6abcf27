//! Error types for the skyforge registries.

use thiserror::Error;

use skyforge_core::PlanStatus;

/// Result type alias for registry operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("plan {plan_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        plan_id: String,
        from: PlanStatus,
        to: PlanStatus,
    },
}
