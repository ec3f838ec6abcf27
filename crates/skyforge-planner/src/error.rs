//! Planner error types.

use thiserror::Error;

/// Errors that can occur while building a deployment plan.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("no deployable target matches the request")]
    NoTarget,

    #[error("target {0} is blocked by safety policy")]
    Blocked(String),

    #[error("unsafe action sequence: {0}")]
    UnsafeSequence(String),

    #[error("state error: {0}")]
    State(#[from] skyforge_state::StateError),
}

pub type PlannerResult<T> = Result<T, PlannerError>;
