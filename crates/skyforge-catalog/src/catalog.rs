//! Target discovery across providers.

use std::cmp::Ordering;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use skyforge_core::*;
use skyforge_provider::{AdapterSet, ProviderAdapter};

/// Caller-side narrowing of discovery results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetFilter {
    pub providers: Option<Vec<Provider>>,
    pub regions: Option<Vec<String>>,
    pub max_cost: Option<f64>,
    /// Exact tier match.
    pub tier: Option<Tier>,
}

/// Requirements for [`TargetCatalog::find_cheapest_target`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetRequirements {
    /// Lowest acceptable tier.
    pub min_tier: Option<Tier>,
    /// Highest acceptable latency. Targets with unknown latency pass.
    pub max_latency_ms: Option<u32>,
    pub regions: Option<Vec<String>>,
}

/// Queries adapters and filters targets by safety policy.
pub struct TargetCatalog {
    adapters: AdapterSet,
    constraints: SafetyConstraints,
}

impl TargetCatalog {
    pub fn new(adapters: AdapterSet, constraints: SafetyConstraints) -> Self {
        Self {
            adapters,
            constraints,
        }
    }

    pub fn constraints(&self) -> &SafetyConstraints {
        &self.constraints
    }

    /// Deployable targets matching `filter`, cheapest first.
    ///
    /// A failing adapter is logged and skipped; it never aborts discovery.
    pub async fn discover_targets(&self, filter: &TargetFilter) -> Vec<DeploymentTarget> {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = self
            .adapters
            .iter()
            .filter(|a| {
                filter
                    .providers
                    .as_ref()
                    .is_none_or(|wanted| wanted.contains(&a.provider()))
            })
            .cloned()
            .collect();

        // A single requested region can be pushed down to the adapter.
        let region = match filter.regions.as_deref() {
            Some([only]) => Some(only.as_str()),
            _ => None,
        };

        let per_adapter = join_all(
            adapters
                .iter()
                .map(|adapter| query_adapter(adapter.as_ref(), region)),
        )
        .await;

        let mut targets: Vec<DeploymentTarget> = per_adapter
            .into_iter()
            .flatten()
            .filter(|t| t.available)
            .filter(|t| !self.constraints.is_blocked(t))
            .filter(|t| t.estimated_monthly_cost <= self.constraints.max_cost_per_instance)
            .filter(|t| filter.max_cost.is_none_or(|max| t.estimated_monthly_cost <= max))
            .filter(|t| filter.tier.is_none_or(|tier| t.tier == tier))
            .filter(|t| {
                filter
                    .regions
                    .as_ref()
                    .is_none_or(|regions| regions.iter().any(|r| r == &t.region))
            })
            .collect();

        targets.sort_by(compare_cost);
        debug!(count = targets.len(), "targets discovered");
        targets
    }

    /// Cheapest target satisfying `req`, or `None` if nothing qualifies.
    pub async fn find_cheapest_target(
        &self,
        req: &TargetRequirements,
    ) -> Option<DeploymentTarget> {
        let filter = TargetFilter {
            regions: req.regions.clone(),
            ..Default::default()
        };
        self.discover_targets(&filter)
            .await
            .into_iter()
            .find(|t| meets_requirements(t, req))
    }
}

async fn query_adapter(
    adapter: &dyn ProviderAdapter,
    region: Option<&str>,
) -> Vec<DeploymentTarget> {
    let provider = adapter.provider();
    if !adapter.check_availability().await {
        debug!(%provider, "provider unavailable, skipping");
        return Vec::new();
    }
    match adapter.list_targets(region).await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(%provider, error = %e, "target listing failed");
            Vec::new()
        }
    }
}

fn meets_requirements(target: &DeploymentTarget, req: &TargetRequirements) -> bool {
    if req.min_tier.is_some_and(|min| target.tier < min) {
        return false;
    }
    match (req.max_latency_ms, target.latency_ms) {
        (Some(max), Some(latency)) => latency <= max,
        _ => true,
    }
}

/// Ascending by cost; ties broken by id so results are deterministic.
fn compare_cost(a: &DeploymentTarget, b: &DeploymentTarget) -> Ordering {
    a.estimated_monthly_cost
        .partial_cmp(&b.estimated_monthly_cost)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}
