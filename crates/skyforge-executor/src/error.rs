//! Executor error types.

use thiserror::Error;

use skyforge_core::{ActionType, PlanStatus, Provider};
use skyforge_provider::ProviderError;
use skyforge_state::StateError;

/// Errors that can occur while executing plans or mutating instances.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("plan {plan_id} is {status} and cannot be executed")]
    NotExecutable { plan_id: String, status: PlanStatus },

    #[error("plan {0} requires approval")]
    ApprovalRequired(String),

    #[error("instance limit reached: {live} live, {in_flight} in flight, maximum {max}")]
    InstanceLimit { live: u32, in_flight: u32, max: u32 },

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("no adapter registered for {0}")]
    NoAdapter(Provider),

    #[error("{0} needs an instance but none has been provisioned")]
    NoInstance(ActionType),

    #[error("{0} has no target")]
    NoTarget(ActionType),

    #[error("health check failed for {instance}: {message}")]
    HealthCheckFailed { instance: String, message: String },

    #[error("refusing to route traffic to unhealthy instance {0}")]
    UnhealthyTraffic(String),

    #[error("refusing to terminate {instance}: {reason}")]
    SurvivalInvariant { instance: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl ExecutorError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::HealthCheckFailed { .. } | ExecutorError::Provider(_)
        )
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
