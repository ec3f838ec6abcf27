//! Provider adapter error types.

use thiserror::Error;

use skyforge_core::{Provider, Tier};

/// Result type alias for adapter calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors an adapter can report. Callers convert these into typed failure
/// results; they never escape a public orchestrator operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider {0} is unavailable")]
    Unavailable(Provider),

    #[error("{provider} api error: {message}")]
    Api { provider: Provider, message: String },

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("{provider} does not offer tier {tier}")]
    TierUnavailable { provider: Provider, tier: Tier },

    #[error("{provider} does not serve region {region}")]
    RegionUnavailable { provider: Provider, region: String },

    #[error("instance {instance} belongs to {actual}, not {expected}")]
    WrongProvider {
        instance: String,
        expected: Provider,
        actual: Provider,
    },
}

impl ProviderError {
    pub fn api(provider: Provider, message: impl Into<String>) -> Self {
        ProviderError::Api {
            provider,
            message: message.into(),
        }
    }
}
