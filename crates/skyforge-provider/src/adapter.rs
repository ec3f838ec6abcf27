//! The provider adapter trait and the set of registered adapters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use skyforge_core::*;

use crate::error::ProviderResult;

/// Uniform capability surface of one cloud provider.
///
/// This is the only boundary the orchestrator depends on. Implementations
/// share no mutable state with each other.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter drives.
    fn provider(&self) -> Provider;

    /// Whether the provider API is reachable and accepting requests.
    async fn check_availability(&self) -> bool;

    /// Targets offered by the provider, optionally restricted to one region.
    async fn list_targets(&self, region: Option<&str>) -> ProviderResult<Vec<DeploymentTarget>>;

    async fn get_pricing(&self, target: &DeploymentTarget) -> ProviderResult<EstimatedCost>;

    async fn provision(
        &self,
        target: &DeploymentTarget,
        config: &ProvisionConfig,
    ) -> ProviderResult<Instance>;

    async fn deploy(&self, instance: &Instance, container: &ContainerSpec)
    -> ProviderResult<Instance>;

    async fn health_check(&self, instance: &Instance) -> ProviderResult<HealthStatus>;

    async fn get_metrics(&self, instance: &Instance) -> ProviderResult<InstanceMetrics>;

    async fn terminate(&self, instance: &Instance) -> ProviderResult<()>;

    /// Move an instance to another tier in place.
    async fn scale(&self, instance: &Instance, tier: Tier) -> ProviderResult<Instance>;

    async fn update_env(
        &self,
        instance: &Instance,
        env: &HashMap<String, String>,
    ) -> ProviderResult<()>;
}

/// The adapters registered with an orchestrator, one per provider.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: BTreeMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Register an adapter, replacing any previous adapter for its provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Adapter responsible for a target.
    pub fn for_target(&self, target: &DeploymentTarget) -> Option<Arc<dyn ProviderAdapter>> {
        self.get(target.provider)
    }

    /// Registered adapters in provider order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.values()
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.adapters.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubAdapter;

    #[test]
    fn register_replaces_same_provider() {
        let mut set = AdapterSet::new()
            .with(Arc::new(StubAdapter::fly()))
            .with(Arc::new(StubAdapter::aws()));
        assert_eq!(set.len(), 2);

        set.register(Arc::new(StubAdapter::fly()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.providers(), vec![Provider::Aws, Provider::Fly]);
        assert!(set.get(Provider::Render).is_none());
    }
}
