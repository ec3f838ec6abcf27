//! Plan executor: drives a plan through its actions.
//!
//! Actions run strictly in order, each with its own retry policy. The
//! instance produced by `provision-instance` is threaded through every
//! later action. The first action that exhausts its retries fails the
//! plan and triggers the rollback sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use skyforge_core::*;
use skyforge_guard::{InvariantContext, InvariantRegistry, MIN_HEALTHY};
use skyforge_provider::{AdapterSet, ProviderAdapter};
use skyforge_state::{
    EventBus, InstanceLocks, InstanceRegistry, PlanRegistry, SkyforgeEvent, StateError,
};

use crate::error::{ExecutorError, ExecutorResult};
use crate::retry::{is_cancelled, retry};

/// Outcome of one action, including retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: ActionType,
    pub success: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// The instance as it stands after the action.
    pub instance: Option<Instance>,
}

/// Outcome of a whole plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,
    pub plan_id: PlanId,
    pub instance: Option<Instance>,
    pub action_results: Vec<ActionResult>,
    pub error: Option<String>,
    pub rolled_back: bool,
    pub duration_ms: u64,
}

impl DeploymentResult {
    fn rejected(plan_id: &str, err: ExecutorError, started: Instant) -> Self {
        warn!(plan = %plan_id, error = %err, "plan rejected");
        Self {
            success: false,
            plan_id: plan_id.to_string(),
            instance: None,
            action_results: Vec::new(),
            error: Some(err.to_string()),
            rolled_back: false,
            duration_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(500);

/// An instance slot held by a running plan, released on drop.
struct Slot(Arc<AtomicU32>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executes plans and mutates live instances.
#[derive(Clone)]
pub struct PlanExecutor {
    adapters: AdapterSet,
    instances: InstanceRegistry,
    plans: PlanRegistry,
    locks: InstanceLocks,
    guard: Arc<InvariantRegistry>,
    constraints: SafetyConstraints,
    events: EventBus,
    /// Duration of steps backed by external build/CDN systems.
    step_delay: Duration,
    cancel: Option<watch::Receiver<bool>>,
    /// Serializes check-and-remove on the instance registry and slot
    /// reservation against `max_total_instances`.
    lifecycle: Arc<Mutex<()>>,
    /// Plans admitted but not yet registered or rolled back.
    in_flight: Arc<AtomicU32>,
}

impl PlanExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapters: AdapterSet,
        instances: InstanceRegistry,
        plans: PlanRegistry,
        locks: InstanceLocks,
        guard: Arc<InvariantRegistry>,
        constraints: SafetyConstraints,
        events: EventBus,
    ) -> Self {
        Self {
            adapters,
            instances,
            plans,
            locks,
            guard,
            constraints,
            events,
            step_delay: DEFAULT_STEP_DELAY,
            cancel: None,
            lifecycle: Arc::new(Mutex::new(())),
            in_flight: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Abort in-flight actions between retries once `stop` turns true.
    pub fn with_cancellation(mut self, stop: watch::Receiver<bool>) -> Self {
        self.cancel = Some(stop);
        self
    }

    /// Record an approval for a pending plan.
    pub async fn approve_plan(&self, plan_id: &str, approval: &Approval) -> ExecutorResult<()> {
        if !approval.approved {
            return Err(ExecutorError::ApprovalRequired(plan_id.to_string()));
        }
        let from = self.plans.approve(plan_id, &approval.approved_by).await?;
        self.emit_transition(plan_id, from, PlanStatus::Approved);
        info!(plan = %plan_id, approved_by = %approval.approved_by, "plan approved");
        Ok(())
    }

    /// Execute a stored plan.
    ///
    /// Rejections (unknown plan, wrong status, missing approval, instance
    /// limit) leave the plan untouched. Once execution starts, the plan ends
    /// either `completed` or `rolled-back`. An admitted plan holds one
    /// instance slot until it finishes.
    pub async fn execute_plan(&self, plan_id: &str, approval: Option<&Approval>) -> DeploymentResult {
        let started = Instant::now();

        let (plan, _slot) = match self.admit(plan_id, approval).await {
            Ok(admitted) => admitted,
            Err(e) => return DeploymentResult::rejected(plan_id, e, started),
        };

        if plan.status == PlanStatus::PendingApproval {
            let by = approval.map(|a| a.approved_by.as_str()).unwrap_or_default();
            match self.plans.approve(plan_id, by).await {
                Ok(from) => self.emit_transition(plan_id, from, PlanStatus::Approved),
                Err(e) => return DeploymentResult::rejected(plan_id, e.into(), started),
            }
        }
        if let Err(e) = self.transition(plan_id, PlanStatus::Executing).await {
            return DeploymentResult::rejected(plan_id, e, started);
        }

        info!(
            plan = %plan_id,
            target = %plan.target.id,
            actions = plan.actions.len(),
            "executing plan"
        );

        let mut instance: Option<Instance> = None;
        let mut action_results = Vec::with_capacity(plan.actions.len());
        let mut failure: Option<String> = None;

        for action in &plan.actions {
            let result = self.run_action(Some(plan_id), action, instance.as_ref()).await;
            if result.instance.is_some() {
                instance = result.instance.clone();
            }
            let ok = result.success;
            if !ok {
                failure = result.error.clone();
            }
            action_results.push(result);
            if !ok {
                break;
            }
        }

        if failure.is_none() {
            if let Some(inst) = instance.as_mut() {
                inst.status = InstanceStatus::Running;
                match self.instances.insert(inst.clone()).await {
                    Ok(()) => self.events.emit(SkyforgeEvent::InstanceRegistered {
                        instance_id: inst.id.clone(),
                    }),
                    Err(e) => failure = Some(format!("instance registration failed: {e}")),
                }
            }
        }

        if let Some(err) = failure {
            error!(plan = %plan_id, error = %err, "plan failed, rolling back");
            self.transition_or_log(plan_id, PlanStatus::Failed).await;
            self.spawn_rollback(plan.rollback_plan.clone(), instance.clone())
                .await;
            self.transition_or_log(plan_id, PlanStatus::RolledBack).await;
            return DeploymentResult {
                success: false,
                plan_id: plan_id.to_string(),
                instance,
                action_results,
                error: Some(err),
                rolled_back: true,
                duration_ms: elapsed_ms(started),
            };
        }

        self.transition_or_log(plan_id, PlanStatus::Completed).await;
        let duration_ms = elapsed_ms(started);
        info!(
            plan = %plan_id,
            instance = instance.as_ref().map(|i| i.id.as_str()).unwrap_or("-"),
            duration_ms,
            "plan completed"
        );

        DeploymentResult {
            success: true,
            plan_id: plan_id.to_string(),
            instance,
            action_results,
            error: None,
            rolled_back: false,
            duration_ms,
        }
    }

    /// Checks that must pass before a plan changes state. On success one
    /// instance slot is reserved for the plan.
    async fn admit(
        &self,
        plan_id: &str,
        approval: Option<&Approval>,
    ) -> ExecutorResult<(DeploymentPlan, Slot)> {
        let plan = self
            .plans
            .get(plan_id)
            .await
            .ok_or_else(|| ExecutorError::PlanNotFound(plan_id.to_string()))?;

        if !plan.status.is_executable() {
            return Err(ExecutorError::NotExecutable {
                plan_id: plan_id.to_string(),
                status: plan.status,
            });
        }

        let approved = plan.status == PlanStatus::Approved || approval.is_some_and(|a| a.approved);
        if plan.requires_approval && !approved {
            return Err(ExecutorError::ApprovalRequired(plan_id.to_string()));
        }

        let _lifecycle = self.lifecycle.lock().await;
        let live = self.instances.live_count().await as u32;
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if live + in_flight >= self.constraints.max_total_instances {
            return Err(ExecutorError::InstanceLimit {
                live,
                in_flight,
                max: self.constraints.max_total_instances,
            });
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok((plan, Slot(self.in_flight.clone())))
    }

    /// Execute a single action outside of any plan.
    pub async fn execute_action(
        &self,
        action: &DeploymentAction,
        instance: Option<&Instance>,
    ) -> ActionResult {
        self.run_action(None, action, instance).await
    }

    async fn run_action(
        &self,
        plan_id: Option<&str>,
        action: &DeploymentAction,
        instance: Option<&Instance>,
    ) -> ActionResult {
        let started = Instant::now();
        let action_type = action.action_type();

        let _guard = match instance {
            Some(inst) => Some(self.locks.lock(&inst.id).await),
            None => None,
        };

        let outcome = retry(&action.retry_policy, self.cancel.as_ref(), || {
            self.attempt(action, instance)
        })
        .await;

        let duration_ms = elapsed_ms(started);
        let result = match outcome.result {
            Ok(updated) => {
                debug!(
                    plan = plan_id.unwrap_or("-"),
                    action = %action_type,
                    attempts = outcome.attempts,
                    duration_ms,
                    "action succeeded"
                );
                ActionResult {
                    action_type,
                    success: true,
                    attempts: outcome.attempts,
                    duration_ms,
                    error: None,
                    instance: updated,
                }
            }
            Err(e) => {
                warn!(
                    plan = plan_id.unwrap_or("-"),
                    action = %action_type,
                    attempts = outcome.attempts,
                    error = %e,
                    "action failed"
                );
                ActionResult {
                    action_type,
                    success: false,
                    attempts: outcome.attempts,
                    duration_ms,
                    error: Some(e.to_string()),
                    instance: instance.cloned(),
                }
            }
        };

        self.events.emit(SkyforgeEvent::ActionFinished {
            plan_id: plan_id.map(str::to_string),
            action: action_type,
            success: result.success,
            attempts: result.attempts,
        });
        result
    }

    /// One attempt at an action. Returns the instance as it stands afterwards.
    async fn attempt(
        &self,
        action: &DeploymentAction,
        instance: Option<&Instance>,
    ) -> ExecutorResult<Option<Instance>> {
        let action_type = action.action_type();
        let require = || instance.ok_or(ExecutorError::NoInstance(action_type));

        match &action.kind {
            ActionKind::BuildContainer { image, tag } => {
                debug!(%image, %tag, "building container");
                tokio::time::sleep(self.step_delay).await;
                Ok(instance.cloned())
            }
            ActionKind::ProvisionInstance { config } => {
                let target = action
                    .target
                    .as_ref()
                    .ok_or(ExecutorError::NoTarget(action_type))?;
                let adapter = self.adapter(target.provider)?;
                let provisioned = adapter.provision(target, config).await?;
                info!(
                    instance = %provisioned.id,
                    target = %target.id,
                    "instance provisioned"
                );
                Ok(Some(provisioned))
            }
            ActionKind::ConfigureEnv { env } => {
                let inst = require()?;
                self.adapter(inst.target.provider)?
                    .update_env(inst, env)
                    .await?;
                Ok(Some(inst.clone()))
            }
            ActionKind::DeployContainer { container } => {
                let inst = require()?;
                let deployed = self
                    .adapter(inst.target.provider)?
                    .deploy(inst, container)
                    .await?;
                Ok(Some(deployed))
            }
            ActionKind::HealthCheck => {
                let inst = require()?;
                let health = self
                    .adapter(inst.target.provider)?
                    .health_check(inst)
                    .await?;
                if !health.healthy {
                    return Err(ExecutorError::HealthCheckFailed {
                        instance: inst.id.clone(),
                        message: health.message.unwrap_or_else(|| "unhealthy".to_string()),
                    });
                }
                let mut checked = inst.clone();
                checked.last_health_check = Some(health.checked_at);
                checked.health = health;
                Ok(Some(checked))
            }
            ActionKind::RouteTraffic { weight } => {
                let weight = *weight;
                tokio::time::sleep(self.step_delay).await;
                let Some(inst) = instance else {
                    if weight > 0.0 {
                        return Err(ExecutorError::NoInstance(action_type));
                    }
                    return Ok(None);
                };
                if weight > 0.0 && !inst.health.healthy {
                    return Err(ExecutorError::UnhealthyTraffic(inst.id.clone()));
                }
                let mut routed = inst.clone();
                routed.traffic_weight = weight;
                // Registered instances carry their weight in the registry too.
                match self
                    .instances
                    .update(&inst.id, |i| i.traffic_weight = weight)
                    .await
                {
                    Ok(_) | Err(StateError::NotFound(_)) => {}
                    Err(e) => {
                        warn!(instance = %inst.id, weight, error = %e, "registry weight not updated")
                    }
                }
                debug!(instance = %inst.id, weight, "traffic routed");
                Ok(Some(routed))
            }
            ActionKind::ScaleUp { tier } | ActionKind::ScaleDown { tier } => {
                let inst = require()?;
                let scaled = self
                    .adapter(inst.target.provider)?
                    .scale(inst, *tier)
                    .await?;
                Ok(Some(scaled))
            }
            ActionKind::TerminateInstance => {
                let inst = require()?;
                self.adapter(inst.target.provider)?.terminate(inst).await?;
                let mut terminated = inst.clone();
                terminated.status = InstanceStatus::Terminated;
                terminated.traffic_weight = 0.0;
                Ok(Some(terminated))
            }
            ActionKind::UpdateDns { hostname } => {
                debug!(%hostname, "updating dns");
                tokio::time::sleep(self.step_delay).await;
                Ok(instance.cloned())
            }
        }
    }

    /// Run every rollback action exactly once. Failures are logged; the
    /// sequence always runs to the end.
    pub async fn execute_rollback(&self, rollback: &RollbackPlan, instance: Option<Instance>) {
        let mut current = instance;
        for action in &rollback.actions {
            let action_type = action.action_type();
            if current.is_none() && action_type == ActionType::TerminateInstance {
                debug!("nothing provisioned, skipping terminate");
                continue;
            }

            let _guard = match current.as_ref() {
                Some(inst) => Some(self.locks.lock(&inst.id).await),
                None => None,
            };
            match self.attempt(action, current.as_ref()).await {
                Ok(updated) => {
                    debug!(action = %action_type, "rollback action succeeded");
                    if updated.is_some() {
                        current = updated;
                    }
                }
                Err(e) => {
                    error!(action = %action_type, error = %e, "rollback action failed");
                }
            }
        }

        if let Some(inst) = current.filter(|i| i.status == InstanceStatus::Terminated) {
            self.locks.forget(&inst.id).await;
        }
        info!("rollback finished");
    }

    /// Rollback in its own task so that dropping the caller cannot cut it short.
    async fn spawn_rollback(&self, rollback: RollbackPlan, instance: Option<Instance>) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.execute_rollback(&rollback, instance).await });
        if let Err(e) = handle.await {
            error!(error = %e, "rollback task panicked");
        }
    }

    /// Terminate a live instance unless doing so would leave fewer than
    /// `min_healthy_instances` live.
    pub async fn terminate_instance(&self, instance_id: &str) -> bool {
        match self.try_terminate(instance_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(instance = %instance_id, error = %e, "termination refused");
                false
            }
        }
    }

    async fn try_terminate(&self, instance_id: &str) -> ExecutorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let instance = self
            .instances
            .get(instance_id)
            .await
            .ok_or_else(|| ExecutorError::InstanceNotFound(instance_id.to_string()))?;

        let live = self.instances.live_count().await as u32;
        let remaining = if instance.status.is_live() {
            live.saturating_sub(1)
        } else {
            live
        };
        let ctx = InvariantContext {
            healthy_count: remaining,
            min_healthy: self.constraints.min_healthy_instances,
            ..Default::default()
        };
        if let Some(failing) = self.guard.check_only(&[MIN_HEALTHY], &ctx).into_iter().next() {
            return Err(ExecutorError::SurvivalInvariant {
                instance: instance_id.to_string(),
                reason: failing.message,
            });
        }

        let adapter = self.adapter(instance.target.provider)?;
        {
            let _guard = self.locks.lock(instance_id).await;
            self.instances
                .update(instance_id, |i| i.traffic_weight = 0.0)
                .await?;
            adapter.terminate(&instance).await?;
            self.instances.remove(instance_id).await;
        }
        self.locks.forget(instance_id).await;

        self.events.emit(SkyforgeEvent::InstanceTerminated {
            instance_id: instance_id.to_string(),
        });
        info!(instance = %instance_id, remaining, "instance terminated");
        Ok(())
    }

    /// Push new environment variables to a running instance.
    pub async fn update_instance_env(
        &self,
        instance_id: &str,
        env: &HashMap<String, String>,
    ) -> ExecutorResult<Instance> {
        let _guard = self.locks.lock(instance_id).await;
        let instance = self
            .instances
            .get(instance_id)
            .await
            .ok_or_else(|| ExecutorError::InstanceNotFound(instance_id.to_string()))?;

        self.adapter(instance.target.provider)?
            .update_env(&instance, env)
            .await?;
        info!(instance = %instance_id, vars = env.len(), "environment updated");
        Ok(instance)
    }

    /// Move an instance to another tier in place.
    pub async fn resize_instance(&self, instance_id: &str, tier: Tier) -> ExecutorResult<Instance> {
        let _guard = self.locks.lock(instance_id).await;
        let instance = self
            .instances
            .get(instance_id)
            .await
            .ok_or_else(|| ExecutorError::InstanceNotFound(instance_id.to_string()))?;

        let from = instance.target.tier;
        let scaled = self
            .adapter(instance.target.provider)?
            .scale(&instance, tier)
            .await?;
        self.instances.replace(scaled.clone()).await?;

        let spend = self.instances.monthly_spend().await;
        if spend > self.constraints.monthly_budget_limit {
            warn!(
                instance = %instance_id,
                spend,
                limit = self.constraints.monthly_budget_limit,
                "resize pushes spend over budget"
            );
            self.events.emit(SkyforgeEvent::BudgetWarning {
                projected_monthly: spend,
                limit: self.constraints.monthly_budget_limit,
            });
        }
        info!(instance = %instance_id, %from, to = %tier, "instance resized");
        Ok(scaled)
    }

    /// Whether the stop signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        is_cancelled(self.cancel.as_ref())
    }

    fn adapter(&self, provider: Provider) -> ExecutorResult<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(provider)
            .ok_or(ExecutorError::NoAdapter(provider))
    }

    async fn transition(&self, plan_id: &str, to: PlanStatus) -> ExecutorResult<()> {
        let from = self.plans.transition(plan_id, to).await?;
        self.emit_transition(plan_id, from, to);
        Ok(())
    }

    async fn transition_or_log(&self, plan_id: &str, to: PlanStatus) {
        if let Err(e) = self.transition(plan_id, to).await {
            error!(plan = %plan_id, %to, error = %e, "plan transition failed");
        }
    }

    fn emit_transition(&self, plan_id: &str, from: PlanStatus, to: PlanStatus) {
        self.events.emit(SkyforgeEvent::PlanStatusChanged {
            plan_id: plan_id.to_string(),
            from,
            to,
        });
    }
}
