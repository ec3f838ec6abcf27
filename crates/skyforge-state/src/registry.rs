//! In-memory instance and plan registries.
//!
//! Both registries are `Clone` + `Send` + `Sync` (backed by
//! `Arc<RwLock<HashMap>>`) and can be shared across async tasks. They are
//! the only mutable shared state of the orchestrator; swapping them for a
//! persistent store only has to preserve the get/put/remove contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use skyforge_core::*;

use crate::error::{StateError, StateResult};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique id like `plan-1718000000-7`.
pub fn generate_id(prefix: &str) -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{n}", epoch_secs())
}

// ── Instances ─────────────────────────────────────────────────────

/// Keyed store of live instances.
#[derive(Clone, Default)]
pub struct InstanceRegistry {
    instances: Arc<RwLock<HashMap<InstanceId, Instance>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new instance. Fails if the id is already registered.
    pub async fn insert(&self, instance: Instance) -> StateResult<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(StateError::AlreadyExists(instance.id));
        }
        debug!(instance = %instance.id, target = %instance.target.id, "instance registered");
        instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Instance> {
        self.instances.read().await.get(id).cloned()
    }

    /// All instances, oldest first.
    pub async fn list(&self) -> Vec<Instance> {
        let instances = self.instances.read().await;
        let mut all: Vec<Instance> = instances.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Apply `f` to a registered instance and return the updated copy.
    pub async fn update<F>(&self, id: &str, f: F) -> StateResult<Instance>
    where
        F: FnOnce(&mut Instance),
    {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        f(instance);
        Ok(instance.clone())
    }

    /// Replace a registered instance wholesale (e.g. after an adapter call).
    pub async fn replace(&self, instance: Instance) -> StateResult<()> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(&instance.id) {
            Some(slot) => {
                *slot = instance;
                Ok(())
            }
            None => Err(StateError::NotFound(instance.id)),
        }
    }

    pub async fn remove(&self, id: &str) -> Option<Instance> {
        let removed = self.instances.write().await.remove(id);
        if removed.is_some() {
            debug!(instance = %id, "instance removed from registry");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    /// Number of instances whose status still counts towards the fleet.
    pub async fn live_count(&self) -> usize {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.status.is_live())
            .count()
    }

    /// Projected monthly spend of the live fleet.
    pub async fn monthly_spend(&self) -> f64 {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.status.is_live())
            .map(|i| i.target.estimated_monthly_cost)
            .sum()
    }
}

// ── Plans ─────────────────────────────────────────────────────────

/// Keyed store of pending and historical plans.
#[derive(Clone, Default)]
pub struct PlanRegistry {
    plans: Arc<RwLock<HashMap<PlanId, DeploymentPlan>>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, plan: DeploymentPlan) -> StateResult<()> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(StateError::AlreadyExists(plan.id));
        }
        debug!(plan = %plan.id, status = %plan.status, "plan stored");
        plans.insert(plan.id.clone(), plan);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<DeploymentPlan> {
        self.plans.read().await.get(id).cloned()
    }

    /// All plans, newest first.
    pub async fn list(&self) -> Vec<DeploymentPlan> {
        let plans = self.plans.read().await;
        let mut all: Vec<DeploymentPlan> = plans.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        all
    }

    /// Move a plan to `to`, enforcing the forward-only state machine.
    ///
    /// Returns the previous status.
    pub async fn transition(&self, id: &str, to: PlanStatus) -> StateResult<PlanStatus> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        let from = plan.status;
        if !from.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                plan_id: id.to_string(),
                from,
                to,
            });
        }
        plan.status = to;
        plan.updated_at = epoch_secs();
        debug!(plan = %id, %from, %to, "plan transitioned");
        Ok(from)
    }

    /// Record who approved a plan and move it to `Approved`.
    pub async fn approve(&self, id: &str, approved_by: &str) -> StateResult<PlanStatus> {
        let from = self.transition(id, PlanStatus::Approved).await?;
        let mut plans = self.plans.write().await;
        if let Some(plan) = plans.get_mut(id) {
            plan.approved_by = Some(approved_by.to_string());
        }
        Ok(from)
    }

    pub async fn count_by_status(&self) -> HashMap<PlanStatus, usize> {
        let mut counts = HashMap::new();
        for plan in self.plans.read().await.values() {
            *counts.entry(plan.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_target(cost: f64) -> DeploymentTarget {
        DeploymentTarget {
            id: DeploymentTarget::make_id(Provider::Fly, "iad", Tier::Small),
            provider: Provider::Fly,
            region: "iad".to_string(),
            tier: Tier::Small,
            estimated_monthly_cost: cost,
            available: true,
            latency_ms: Some(20),
        }
    }

    fn test_instance(id: &str, status: InstanceStatus, created_at: u64) -> Instance {
        Instance {
            id: id.to_string(),
            name: format!("app-{id}"),
            target: test_target(10.0),
            status,
            endpoint: None,
            health: HealthStatus::unknown(),
            metrics: InstanceMetrics::default(),
            accumulated_cost: 0.0,
            version: "1.0.0".to_string(),
            created_at,
            last_health_check: None,
            traffic_weight: 0.0,
        }
    }

    fn test_plan(id: &str, status: PlanStatus, created_at: u64) -> DeploymentPlan {
        DeploymentPlan {
            id: id.to_string(),
            reason: "test".to_string(),
            target: test_target(10.0),
            actions: Vec::new(),
            estimated_cost: EstimatedCost::from_monthly(10.0),
            requires_approval: status == PlanStatus::PendingApproval,
            approval_reason: None,
            approved_by: None,
            risk: RiskAssessment {
                level: RiskLevel::Low,
                factors: Vec::new(),
                mitigations: Vec::new(),
            },
            expected_outcome: String::new(),
            rollback_plan: RollbackPlan {
                actions: Vec::new(),
                estimated_duration_secs: 0,
                data_preservation: false,
            },
            status,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_id("plan");
        let b = generate_id("plan");
        assert_ne!(a, b);
        assert!(a.starts_with("plan-"));
    }

    #[tokio::test]
    async fn instance_crud() {
        let registry = InstanceRegistry::new();
        registry
            .insert(test_instance("i-1", InstanceStatus::Running, 2))
            .await
            .unwrap();
        registry
            .insert(test_instance("i-0", InstanceStatus::Running, 1))
            .await
            .unwrap();

        assert!(registry
            .insert(test_instance("i-1", InstanceStatus::Running, 3))
            .await
            .is_err());

        let listed = registry.list().await;
        assert_eq!(listed[0].id, "i-0");
        assert_eq!(listed[1].id, "i-1");

        let updated = registry
            .update("i-1", |i| i.traffic_weight = 0.5)
            .await
            .unwrap();
        assert_eq!(updated.traffic_weight, 0.5);

        assert!(registry.remove("i-1").await.is_some());
        assert!(registry.remove("i-1").await.is_none());
        assert_eq!(registry.len().await, 1);
        assert!(registry.update("i-1", |_| {}).await.is_err());
    }

    #[tokio::test]
    async fn live_count_and_spend_skip_dead_instances() {
        let registry = InstanceRegistry::new();
        registry
            .insert(test_instance("a", InstanceStatus::Running, 1))
            .await
            .unwrap();
        registry
            .insert(test_instance("b", InstanceStatus::Degraded, 1))
            .await
            .unwrap();
        registry
            .insert(test_instance("c", InstanceStatus::Failed, 1))
            .await
            .unwrap();

        assert_eq!(registry.live_count().await, 2);
        assert_eq!(registry.monthly_spend().await, 20.0);
    }

    #[tokio::test]
    async fn plan_transitions_are_enforced() {
        let registry = PlanRegistry::new();
        registry
            .insert(test_plan("p-1", PlanStatus::PendingApproval, 1))
            .await
            .unwrap();

        let err = registry
            .transition("p-1", PlanStatus::Executing)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));

        let from = registry.approve("p-1", "ops@example.com").await.unwrap();
        assert_eq!(from, PlanStatus::PendingApproval);
        registry.transition("p-1", PlanStatus::Executing).await.unwrap();
        registry.transition("p-1", PlanStatus::Failed).await.unwrap();
        registry.transition("p-1", PlanStatus::RolledBack).await.unwrap();

        let plan = registry.get("p-1").await.unwrap();
        assert_eq!(plan.status, PlanStatus::RolledBack);
        assert_eq!(plan.approved_by.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn plans_list_newest_first_and_count() {
        let registry = PlanRegistry::new();
        registry.insert(test_plan("old", PlanStatus::Draft, 1)).await.unwrap();
        registry.insert(test_plan("new", PlanStatus::Draft, 5)).await.unwrap();
        registry
            .insert(test_plan("pending", PlanStatus::PendingApproval, 3))
            .await
            .unwrap();

        let ids: Vec<String> = registry.list().await.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["new", "pending", "old"]);

        let counts = registry.count_by_status().await;
        assert_eq!(counts.get(&PlanStatus::Draft), Some(&2));
        assert_eq!(counts.get(&PlanStatus::PendingApproval), Some(&1));
    }
}
