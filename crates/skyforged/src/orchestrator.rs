//! The orchestrator: every skyforge component wired together once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use skyforge_autoscale::{AutoScaler, ScalingOutcome};
use skyforge_catalog::{TargetCatalog, TargetFilter, TargetRequirements};
use skyforge_core::*;
use skyforge_executor::{DeploymentResult, ExecutorResult, PlanExecutor};
use skyforge_guard::{FailingCheck, InvariantContext, InvariantRegistry};
use skyforge_health::HealthMonitor;
use skyforge_planner::{DeploymentPlanner, PlanRequest, PlannerResult};
use skyforge_provider::{AdapterSet, StubAdapter};
use skyforge_state::{EventBus, InstanceLocks, InstanceRegistry, PlanRegistry, SkyforgeEvent};

/// Snapshot of the fleet for operators.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub instances: Vec<Instance>,
    pub live_instances: usize,
    pub monthly_spend: f64,
    pub monthly_budget_limit: f64,
    /// Plan counts keyed by status name.
    pub plans: BTreeMap<String, usize>,
}

/// Stub adapters for the given providers.
pub fn stub_adapters(providers: &[Provider]) -> AdapterSet {
    providers.iter().fold(AdapterSet::new(), |set, p| {
        set.with(Arc::new(StubAdapter::for_provider(*p)))
    })
}

/// Owns the registries and every component. Constructed once at startup.
pub struct Orchestrator {
    constraints: SafetyConstraints,
    monitor_settings: MonitorSettings,
    adapters: AdapterSet,
    instances: InstanceRegistry,
    plans: PlanRegistry,
    events: EventBus,
    guard: Arc<InvariantRegistry>,
    catalog: Arc<TargetCatalog>,
    planner: Arc<DeploymentPlanner>,
    executor: PlanExecutor,
    health: Arc<HealthMonitor>,
    scaler: Arc<AutoScaler>,
    shutdown_tx: watch::Sender<bool>,
}

impl Orchestrator {
    /// Wire all components from a configuration and a set of adapters.
    pub fn new(config: &SkyforgeConfig, adapters: AdapterSet) -> anyhow::Result<Self> {
        let constraints = config.safety_constraints()?;
        let policy = config.scaling_policy()?;
        let monitor_settings = config.monitor_settings();

        let instances = InstanceRegistry::new();
        let plans = PlanRegistry::new();
        let locks = InstanceLocks::new();
        let events = EventBus::default();
        let guard = Arc::new(InvariantRegistry::with_baseline());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let catalog = Arc::new(TargetCatalog::new(adapters.clone(), constraints.clone()));
        let planner = Arc::new(DeploymentPlanner::new(
            catalog.clone(),
            adapters.clone(),
            instances.clone(),
            plans.clone(),
            guard.clone(),
            constraints.clone(),
            config.deployment_defaults(),
            events.clone(),
        ));
        let executor = PlanExecutor::new(
            adapters.clone(),
            instances.clone(),
            plans.clone(),
            locks.clone(),
            guard.clone(),
            constraints.clone(),
            events.clone(),
        )
        .with_step_delay(config.simulated_step_delay())
        .with_cancellation(shutdown_rx);
        let health = Arc::new(HealthMonitor::new(
            adapters.clone(),
            instances.clone(),
            locks,
            events.clone(),
            constraints.min_healthy_instances,
            monitor_settings.unhealthy_threshold,
        ));
        let scaler = Arc::new(AutoScaler::new(
            policy,
            catalog.clone(),
            planner.clone(),
            executor.clone(),
            instances.clone(),
            health.clone(),
            guard.clone(),
            events.clone(),
        ));

        info!(
            providers = ?adapters.providers(),
            budget = constraints.monthly_budget_limit,
            min_healthy = constraints.min_healthy_instances,
            "orchestrator initialized"
        );

        Ok(Self {
            constraints,
            monitor_settings,
            adapters,
            instances,
            plans,
            events,
            guard,
            catalog,
            planner,
            executor,
            health,
            scaler,
            shutdown_tx,
        })
    }

    /// An orchestrator backed by stub adapters for every enabled provider.
    pub fn from_config_with_stubs(config: &SkyforgeConfig) -> anyhow::Result<Self> {
        let providers = config.enabled_providers()?;
        Self::new(config, stub_adapters(&providers))
    }

    pub fn constraints(&self) -> &SafetyConstraints {
        &self.constraints
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    pub fn plans(&self) -> &PlanRegistry {
        &self.plans
    }

    /// Receive lifecycle events from every component.
    pub fn subscribe(&self) -> broadcast::Receiver<SkyforgeEvent> {
        self.events.subscribe()
    }

    // ── Discovery & planning ──────────────────────────────────────

    pub async fn discover_targets(&self, filter: &TargetFilter) -> Vec<DeploymentTarget> {
        self.catalog.discover_targets(filter).await
    }

    pub async fn find_cheapest_target(&self, req: &TargetRequirements) -> Option<DeploymentTarget> {
        self.catalog.find_cheapest_target(req).await
    }

    pub async fn create_plan(&self, req: PlanRequest) -> PlannerResult<DeploymentPlan> {
        self.planner.create_plan(req).await
    }

    // ── Execution ─────────────────────────────────────────────────

    pub async fn approve_plan(&self, plan_id: &str, approval: &Approval) -> ExecutorResult<()> {
        self.executor.approve_plan(plan_id, approval).await
    }

    pub async fn execute_plan(&self, plan_id: &str, approval: Option<&Approval>) -> DeploymentResult {
        self.executor.execute_plan(plan_id, approval).await
    }

    pub async fn terminate_instance(&self, instance_id: &str) -> bool {
        self.executor.terminate_instance(instance_id).await
    }

    pub async fn update_instance_env(
        &self,
        instance_id: &str,
        env: &HashMap<String, String>,
    ) -> ExecutorResult<Instance> {
        self.executor.update_instance_env(instance_id, env).await
    }

    pub async fn resize_instance(&self, instance_id: &str, tier: Tier) -> ExecutorResult<Instance> {
        self.executor.resize_instance(instance_id, tier).await
    }

    // ── Health & scaling ──────────────────────────────────────────

    pub async fn check_all_health(&self) -> HealthReport {
        self.health.check_all_health().await
    }

    pub async fn evaluate_scaling(&self) -> ScalingDecision {
        self.scaler.evaluate_scaling().await
    }

    pub async fn execute_scaling(&self, decision: &ScalingDecision) -> ScalingOutcome {
        self.scaler.execute_scaling(decision).await
    }

    /// Evaluate every invariant against the registry as it stands, without
    /// probing providers.
    pub async fn check_invariants(&self) -> Vec<FailingCheck> {
        let live: Vec<Instance> = self
            .instances
            .list()
            .await
            .into_iter()
            .filter(|i| i.status.is_live())
            .collect();
        let ctx = InvariantContext {
            current_spend: live.iter().map(|i| i.target.estimated_monthly_cost).sum(),
            budget_limit: self.constraints.monthly_budget_limit,
            healthy_count: live.iter().filter(|i| i.health.healthy).count() as u32,
            min_healthy: self.constraints.min_healthy_instances,
            unhealthy_with_traffic: live
                .iter()
                .filter(|i| !i.health.healthy && i.receives_traffic())
                .count() as u32,
        };
        self.guard.check_all(&ctx)
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let plans = self
            .plans
            .count_by_status()
            .await
            .into_iter()
            .map(|(status, n)| (status.to_string(), n))
            .collect();
        OrchestratorStatus {
            instances: self.instances.list().await,
            live_instances: self.instances.live_count().await,
            monthly_spend: self.instances.monthly_spend().await,
            monthly_budget_limit: self.constraints.monthly_budget_limit,
            plans,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Run the health and autoscale loops until [`Orchestrator::shutdown`].
    pub async fn run_control_loop(&self) {
        let health = self.health.clone();
        let health_interval = self.monitor_settings.interval;
        let health_shutdown = self.shutdown_tx.subscribe();
        let health_handle = tokio::spawn(async move {
            health.run(health_interval, health_shutdown).await;
        });

        let scaler = self.scaler.clone();
        let autoscale_interval = self.monitor_settings.autoscale_interval;
        let autoscale_shutdown = self.shutdown_tx.subscribe();
        let autoscale_handle = tokio::spawn(async move {
            scaler.run(autoscale_interval, autoscale_shutdown).await;
        });

        info!(
            health_interval_secs = health_interval.as_secs(),
            autoscale_interval_secs = autoscale_interval.as_secs(),
            "control loop running"
        );

        let _ = health_handle.await;
        let _ = autoscale_handle.await;
        debug!("control loop stopped");
    }

    /// Stop the control loops and abort in-flight action retries.
    pub fn shutdown(&self) {
        info!("orchestrator shutting down");
        let _ = self.shutdown_tx.send(true);
    }
}
