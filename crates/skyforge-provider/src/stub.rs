//! In-process provider adapters.
//!
//! Each provider is described by a [`ProviderProfile`] literal (regions,
//! per-tier prices, endpoint domain) and driven by the same [`StubAdapter`].
//! The stub keeps the instances it created, serves metrics that callers set,
//! and supports fault injection so retry and rollback paths can be exercised
//! without a real cloud account.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use skyforge_core::*;

use crate::adapter::ProviderAdapter;
use crate::error::{ProviderError, ProviderResult};

/// Static description of one provider's offering.
#[derive(Debug, Clone, Copy)]
pub struct ProviderProfile {
    pub provider: Provider,
    /// (region, estimated latency in ms).
    pub regions: &'static [(&'static str, u32)],
    /// (tier, monthly USD). Tiers not listed are not offered.
    pub prices: &'static [(Tier, f64)],
    pub endpoint_domain: &'static str,
}

pub const AWS: ProviderProfile = ProviderProfile {
    provider: Provider::Aws,
    regions: &[
        ("us-east-1", 25),
        ("us-west-2", 60),
        ("eu-west-1", 90),
        ("ap-south-1", 180),
    ],
    prices: &[
        (Tier::Nano, 3.80),
        (Tier::Micro, 7.59),
        (Tier::Small, 15.18),
        (Tier::Medium, 30.37),
        (Tier::Large, 60.74),
        (Tier::Xlarge, 121.47),
    ],
    endpoint_domain: "compute.amazonaws.com",
};

pub const FLY: ProviderProfile = ProviderProfile {
    provider: Provider::Fly,
    regions: &[("iad", 20), ("ord", 35), ("lhr", 85), ("nrt", 150)],
    prices: &[
        (Tier::Nano, 1.94),
        (Tier::Micro, 3.88),
        (Tier::Small, 5.70),
        (Tier::Medium, 11.39),
        (Tier::Large, 22.78),
        (Tier::Xlarge, 45.57),
    ],
    endpoint_domain: "fly.dev",
};

pub const RAILWAY: ProviderProfile = ProviderProfile {
    provider: Provider::Railway,
    regions: &[("us-east4", 25), ("us-west1", 55), ("europe-west4", 95)],
    prices: &[
        (Tier::Micro, 5.0),
        (Tier::Small, 10.0),
        (Tier::Medium, 20.0),
        (Tier::Large, 40.0),
        (Tier::Xlarge, 80.0),
    ],
    endpoint_domain: "up.railway.app",
};

pub const RENDER: ProviderProfile = ProviderProfile {
    provider: Provider::Render,
    regions: &[
        ("ohio", 30),
        ("oregon", 60),
        ("frankfurt", 100),
        ("singapore", 200),
    ],
    prices: &[
        (Tier::Micro, 7.0),
        (Tier::Small, 25.0),
        (Tier::Medium, 85.0),
        (Tier::Large, 175.0),
        (Tier::Xlarge, 225.0),
    ],
    endpoint_domain: "onrender.com",
};

pub const CLOUDFLARE_WORKERS: ProviderProfile = ProviderProfile {
    provider: Provider::CloudflareWorkers,
    regions: &[("global", 15)],
    prices: &[(Tier::Nano, 5.0), (Tier::Micro, 10.0)],
    endpoint_domain: "workers.dev",
};

impl ProviderProfile {
    pub fn price(&self, tier: Tier) -> Option<f64> {
        self.prices.iter().find(|(t, _)| *t == tier).map(|(_, p)| *p)
    }

    pub fn latency(&self, region: &str) -> Option<u32> {
        self.regions
            .iter()
            .find(|(r, _)| *r == region)
            .map(|(_, l)| *l)
    }

    pub fn target(&self, region: &str, tier: Tier) -> Option<DeploymentTarget> {
        let latency = self.latency(region)?;
        let cost = self.price(tier)?;
        Some(DeploymentTarget {
            id: DeploymentTarget::make_id(self.provider, region, tier),
            provider: self.provider,
            region: region.to_string(),
            tier,
            estimated_monthly_cost: cost,
            available: true,
            latency_ms: Some(latency),
        })
    }
}

/// Injected failures. Counters are consumed one per failing call.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub unavailable: bool,
    pub list_targets_error: bool,
    pub provision_failures: u32,
    pub deploy_failures: u32,
    /// Number of upcoming health checks that report unhealthy.
    pub unhealthy_checks: u32,
    /// Instances that always report unhealthy.
    pub unhealthy_instances: HashSet<String>,
    /// Instances whose health check returns an adapter error.
    pub health_check_errors: HashSet<String>,
    pub terminate_error: bool,
    pub update_env_error: bool,
    pub scale_error: bool,
}

#[derive(Default)]
struct StubState {
    faults: Faults,
    instances: HashMap<InstanceId, Instance>,
    metrics: HashMap<InstanceId, InstanceMetrics>,
    calls: Vec<&'static str>,
    next_seq: u64,
}

/// Provider adapter backed by a [`ProviderProfile`] and in-memory state.
pub struct StubAdapter {
    profile: ProviderProfile,
    state: Mutex<StubState>,
}

impl StubAdapter {
    pub fn new(profile: ProviderProfile) -> Self {
        Self {
            profile,
            state: Mutex::new(StubState::default()),
        }
    }

    pub fn aws() -> Self {
        Self::new(AWS)
    }

    pub fn fly() -> Self {
        Self::new(FLY)
    }

    pub fn railway() -> Self {
        Self::new(RAILWAY)
    }

    pub fn render() -> Self {
        Self::new(RENDER)
    }

    pub fn cloudflare_workers() -> Self {
        Self::new(CLOUDFLARE_WORKERS)
    }

    /// Stub for any provider.
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Aws => Self::aws(),
            Provider::Fly => Self::fly(),
            Provider::Railway => Self::railway(),
            Provider::Render => Self::render(),
            Provider::CloudflareWorkers => Self::cloudflare_workers(),
        }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Replace the injected faults.
    pub async fn set_faults(&self, faults: Faults) {
        self.state.lock().await.faults = faults;
    }

    /// Mutate the injected faults in place.
    pub async fn update_faults<F: FnOnce(&mut Faults)>(&self, f: F) {
        f(&mut self.state.lock().await.faults);
    }

    /// Metrics the stub will report for an instance.
    pub async fn set_metrics(&self, instance_id: &str, metrics: InstanceMetrics) {
        self.state
            .lock()
            .await
            .metrics
            .insert(instance_id.to_string(), metrics);
    }

    /// How many times `op` was called (e.g. "provision", "terminate").
    pub async fn calls(&self, op: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    /// Ids of instances currently running on this provider.
    pub async fn running_instances(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.state.lock().await.instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn ensure_owned(&self, instance: &Instance) -> ProviderResult<()> {
        if instance.target.provider != self.profile.provider {
            return Err(ProviderError::WrongProvider {
                instance: instance.id.clone(),
                expected: self.profile.provider,
                actual: instance.target.provider,
            });
        }
        Ok(())
    }

    fn api_error(&self, message: &str) -> ProviderError {
        ProviderError::api(self.profile.provider, message)
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn provider(&self) -> Provider {
        self.profile.provider
    }

    async fn check_availability(&self) -> bool {
        let mut state = self.state.lock().await;
        state.calls.push("check_availability");
        !state.faults.unavailable
    }

    async fn list_targets(&self, region: Option<&str>) -> ProviderResult<Vec<DeploymentTarget>> {
        let mut state = self.state.lock().await;
        state.calls.push("list_targets");
        if state.faults.unavailable {
            return Err(ProviderError::Unavailable(self.profile.provider));
        }
        if state.faults.list_targets_error {
            return Err(self.api_error("injected list_targets failure"));
        }

        let targets = self
            .profile
            .regions
            .iter()
            .filter(|(r, _)| region.is_none_or(|wanted| wanted == *r))
            .flat_map(|(r, _)| {
                self.profile
                    .prices
                    .iter()
                    .filter_map(move |(tier, _)| self.profile.target(r, *tier))
            })
            .collect();
        Ok(targets)
    }

    async fn get_pricing(&self, target: &DeploymentTarget) -> ProviderResult<EstimatedCost> {
        self.state.lock().await.calls.push("get_pricing");
        let monthly = self
            .profile
            .price(target.tier)
            .ok_or(ProviderError::TierUnavailable {
                provider: self.profile.provider,
                tier: target.tier,
            })?;
        Ok(EstimatedCost::from_monthly(monthly))
    }

    async fn provision(
        &self,
        target: &DeploymentTarget,
        config: &ProvisionConfig,
    ) -> ProviderResult<Instance> {
        let mut state = self.state.lock().await;
        state.calls.push("provision");
        if state.faults.unavailable {
            return Err(ProviderError::Unavailable(self.profile.provider));
        }
        if state.faults.provision_failures > 0 {
            state.faults.provision_failures -= 1;
            return Err(self.api_error("injected provision failure"));
        }
        let target = self
            .profile
            .target(&target.region, target.tier)
            .ok_or_else(|| ProviderError::RegionUnavailable {
                provider: self.profile.provider,
                region: target.region.clone(),
            })?;

        state.next_seq += 1;
        let id = format!("{}-{}", self.profile.provider, state.next_seq);
        let instance = Instance {
            id: id.clone(),
            name: config.name.clone(),
            endpoint: Some(format!(
                "https://{}-{}.{}",
                config.name, state.next_seq, self.profile.endpoint_domain
            )),
            target,
            status: InstanceStatus::Starting,
            health: HealthStatus::unknown(),
            metrics: InstanceMetrics::default(),
            accumulated_cost: 0.0,
            version: config.version.clone(),
            created_at: epoch_secs(),
            last_health_check: None,
            traffic_weight: 0.0,
        };
        state.instances.insert(id.clone(), instance.clone());
        debug!(provider = %self.profile.provider, instance = %id, "stub instance provisioned");
        Ok(instance)
    }

    async fn deploy(
        &self,
        instance: &Instance,
        container: &ContainerSpec,
    ) -> ProviderResult<Instance> {
        self.ensure_owned(instance)?;
        let mut state = self.state.lock().await;
        state.calls.push("deploy");
        if state.faults.deploy_failures > 0 {
            state.faults.deploy_failures -= 1;
            return Err(self.api_error("injected deploy failure"));
        }
        let stored = state
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| ProviderError::InstanceNotFound(instance.id.clone()))?;
        stored.status = InstanceStatus::Running;
        debug!(
            instance = %instance.id,
            image = %container.image,
            tag = %container.tag,
            "stub container deployed"
        );

        let mut deployed = instance.clone();
        deployed.status = InstanceStatus::Running;
        Ok(deployed)
    }

    async fn health_check(&self, instance: &Instance) -> ProviderResult<HealthStatus> {
        let mut state = self.state.lock().await;
        state.calls.push("health_check");
        if state.faults.health_check_errors.contains(&instance.id) {
            return Err(self.api_error("injected health check error"));
        }
        if !state.instances.contains_key(&instance.id) {
            return Err(ProviderError::InstanceNotFound(instance.id.clone()));
        }

        let now = epoch_secs();
        if state.faults.unhealthy_instances.contains(&instance.id) {
            return Ok(HealthStatus::unhealthy(now, "health endpoint returned 503"));
        }
        if state.faults.unhealthy_checks > 0 {
            state.faults.unhealthy_checks -= 1;
            return Ok(HealthStatus::unhealthy(now, "health endpoint returned 503"));
        }
        let latency = u64::from(instance.target.latency_ms.unwrap_or(50));
        Ok(HealthStatus::healthy(now, latency))
    }

    async fn get_metrics(&self, instance: &Instance) -> ProviderResult<InstanceMetrics> {
        let mut state = self.state.lock().await;
        state.calls.push("get_metrics");
        if !state.instances.contains_key(&instance.id) {
            return Err(ProviderError::InstanceNotFound(instance.id.clone()));
        }
        Ok(state.metrics.get(&instance.id).cloned().unwrap_or_default())
    }

    async fn terminate(&self, instance: &Instance) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push("terminate");
        if state.faults.terminate_error {
            return Err(self.api_error("injected terminate failure"));
        }
        state
            .instances
            .remove(&instance.id)
            .ok_or_else(|| ProviderError::InstanceNotFound(instance.id.clone()))?;
        state.metrics.remove(&instance.id);
        debug!(instance = %instance.id, "stub instance terminated");
        Ok(())
    }

    async fn scale(&self, instance: &Instance, tier: Tier) -> ProviderResult<Instance> {
        self.ensure_owned(instance)?;
        let mut state = self.state.lock().await;
        state.calls.push("scale");
        if state.faults.scale_error {
            return Err(self.api_error("injected scale failure"));
        }
        let target = self
            .profile
            .target(&instance.target.region, tier)
            .ok_or(ProviderError::TierUnavailable {
                provider: self.profile.provider,
                tier,
            })?;
        let stored = state
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| ProviderError::InstanceNotFound(instance.id.clone()))?;
        stored.target = target.clone();

        let mut scaled = instance.clone();
        scaled.target = target;
        Ok(scaled)
    }

    async fn update_env(
        &self,
        instance: &Instance,
        env: &HashMap<String, String>,
    ) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push("update_env");
        if state.faults.update_env_error {
            return Err(self.api_error("injected update_env failure"));
        }
        if !state.instances.contains_key(&instance.id) {
            return Err(ProviderError::InstanceNotFound(instance.id.clone()));
        }
        debug!(instance = %instance.id, vars = env.len(), "stub env updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ProvisionConfig {
        ProvisionConfig {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn lists_every_region_and_offered_tier() {
        let fly = StubAdapter::fly();
        let all = fly.list_targets(None).await.unwrap();
        assert_eq!(all.len(), FLY.regions.len() * FLY.prices.len());

        let iad = fly.list_targets(Some("iad")).await.unwrap();
        assert_eq!(iad.len(), FLY.prices.len());
        assert!(iad.iter().all(|t| t.region == "iad" && t.available));
    }

    #[tokio::test]
    async fn workers_offer_no_small_tier() {
        let workers = StubAdapter::cloudflare_workers();
        let targets = workers.list_targets(None).await.unwrap();
        assert!(targets.iter().all(|t| t.tier <= Tier::Micro));
    }

    #[tokio::test]
    async fn provision_deploy_terminate_lifecycle() {
        let aws = StubAdapter::aws();
        let target = AWS.target("us-east-1", Tier::Small).unwrap();

        let instance = aws.provision(&target, &config("api")).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Starting);
        assert!(instance.endpoint.as_deref().unwrap().ends_with("compute.amazonaws.com"));

        let deployed = aws
            .deploy(&instance, &ContainerSpec::default())
            .await
            .unwrap();
        assert_eq!(deployed.status, InstanceStatus::Running);

        let health = aws.health_check(&deployed).await.unwrap();
        assert!(health.healthy);

        aws.terminate(&deployed).await.unwrap();
        assert!(aws.running_instances().await.is_empty());
        assert!(aws.terminate(&deployed).await.is_err());
    }

    #[tokio::test]
    async fn injected_provision_failures_are_consumed() {
        let fly = StubAdapter::fly();
        fly.update_faults(|f| f.provision_failures = 2).await;
        let target = FLY.target("iad", Tier::Nano).unwrap();

        assert!(fly.provision(&target, &config("a")).await.is_err());
        assert!(fly.provision(&target, &config("a")).await.is_err());
        assert!(fly.provision(&target, &config("a")).await.is_ok());
        assert_eq!(fly.calls("provision").await, 3);
    }

    #[tokio::test]
    async fn unhealthy_faults_and_metrics() {
        let fly = StubAdapter::fly();
        let target = FLY.target("iad", Tier::Small).unwrap();
        let instance = fly.provision(&target, &config("a")).await.unwrap();

        fly.update_faults(|f| f.unhealthy_checks = 1).await;
        assert!(!fly.health_check(&instance).await.unwrap().healthy);
        assert!(fly.health_check(&instance).await.unwrap().healthy);

        fly.set_metrics(
            &instance.id,
            InstanceMetrics {
                cpu_percent: 42.0,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(fly.get_metrics(&instance).await.unwrap().cpu_percent, 42.0);
    }

    #[tokio::test]
    async fn scale_changes_tier_and_price() {
        let railway = StubAdapter::railway();
        let target = RAILWAY.target("us-east4", Tier::Small).unwrap();
        let instance = railway.provision(&target, &config("a")).await.unwrap();

        let scaled = railway.scale(&instance, Tier::Large).await.unwrap();
        assert_eq!(scaled.target.tier, Tier::Large);
        assert_eq!(scaled.target.estimated_monthly_cost, 40.0);

        assert!(railway.scale(&instance, Tier::Nano).await.is_err());
    }

    #[tokio::test]
    async fn rejects_foreign_instances() {
        let fly = StubAdapter::fly();
        let aws = StubAdapter::aws();
        let target = AWS.target("us-east-1", Tier::Small).unwrap();
        let instance = aws.provision(&target, &config("a")).await.unwrap();

        let err = fly
            .deploy(&instance, &ContainerSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::WrongProvider { .. }));
    }

    #[tokio::test]
    async fn unavailable_provider_refuses_work() {
        let render = StubAdapter::render();
        render.update_faults(|f| f.unavailable = true).await;
        assert!(!render.check_availability().await);
        assert_eq!(
            render.list_targets(None).await.unwrap_err(),
            ProviderError::Unavailable(Provider::Render)
        );
    }
}
