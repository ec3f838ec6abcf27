//! Autoscaler: health-report-driven instance scaling.
//!
//! Reads a [`HealthReport`], compares average CPU and per-instance RPS
//! against the [`ScalingPolicy`], and decides whether to add or remove one
//! instance. Scale-ups go through the planner and executor like any other
//! deployment; scale-downs terminate the least-loaded instance.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use skyforge_catalog::{TargetCatalog, TargetRequirements};
use skyforge_core::*;
use skyforge_executor::PlanExecutor;
use skyforge_guard::{InvariantContext, InvariantRegistry, SPENDING_WITHIN_BUDGET};
use skyforge_health::HealthMonitor;
use skyforge_planner::{DeploymentPlanner, PlanRequest};
use skyforge_state::{EventBus, InstanceRegistry, SkyforgeEvent};

/// Smallest tier the autoscaler will add.
pub const SCALE_UP_MIN_TIER: Tier = Tier::Small;

/// Spend figures an evaluation is made against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendEstimate {
    /// Monthly cost of the live fleet.
    pub current_monthly: f64,
    /// Monthly cost of the instance a scale-up would add.
    pub new_instance_monthly: f64,
}

/// What `execute_scaling` did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingOutcome {
    pub success: bool,
    pub action: ScalingAction,
    pub plan_ids: Vec<PlanId>,
    /// Instances added (scale-up) or removed (scale-down).
    pub instance_ids: Vec<InstanceId>,
    /// A plan was created but waits for an operator.
    pub pending_approval: bool,
    pub error: Option<String>,
}

impl ScalingOutcome {
    fn new(action: ScalingAction) -> Self {
        Self {
            success: false,
            action,
            plan_ids: Vec::new(),
            instance_ids: Vec::new(),
            pending_approval: false,
            error: None,
        }
    }

    fn failed(action: ScalingAction, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(action)
        }
    }
}

/// The autoscaler evaluates health reports and scales the fleet.
pub struct AutoScaler {
    policy: ScalingPolicy,
    catalog: Arc<TargetCatalog>,
    planner: Arc<DeploymentPlanner>,
    executor: PlanExecutor,
    instances: InstanceRegistry,
    health: Arc<HealthMonitor>,
    guard: Arc<InvariantRegistry>,
    events: EventBus,
    /// When the last scaling action succeeded (cooldown tracking).
    last_scaled: Mutex<Option<Instant>>,
}

impl AutoScaler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: ScalingPolicy,
        catalog: Arc<TargetCatalog>,
        planner: Arc<DeploymentPlanner>,
        executor: PlanExecutor,
        instances: InstanceRegistry,
        health: Arc<HealthMonitor>,
        guard: Arc<InvariantRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            policy,
            catalog,
            planner,
            executor,
            instances,
            health,
            guard,
            events,
            last_scaled: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Decide how to scale given a health report. Pure: no I/O, no cooldown.
    pub fn evaluate(&self, report: &HealthReport, spend: &SpendEstimate) -> ScalingDecision {
        let p = &self.policy;
        let current = report.total_instances;
        let avg_cpu = report.average_cpu();
        let rps_per_instance = report.total_rps() / f64::from(current.max(1));

        if current < p.min_instances {
            let missing = p.min_instances - current;
            let cost_impact = spend.new_instance_monthly * f64::from(missing);
            return ScalingDecision {
                action: ScalingAction::ScaleUp,
                current_instances: current,
                target_instances: p.min_instances,
                reason: format!("{current} instance(s) below minimum of {}", p.min_instances),
                confidence: 1.0,
                cost_impact,
                requires_approval: self.over_budget(spend.current_monthly + cost_impact),
            };
        }

        let cpu_up = p.target_cpu_utilization * 100.0 * p.scale_up_threshold;
        let cpu_down = p.target_cpu_utilization * 100.0 * p.scale_down_threshold;
        let rps_down = p.target_requests_per_instance * p.scale_down_rps_ratio;

        let cpu_hot = avg_cpu > cpu_up;
        let rps_hot = rps_per_instance > p.target_requests_per_instance;

        if cpu_hot || rps_hot {
            if current >= p.max_instances {
                return maintain(
                    current,
                    format!("under load but already at maximum of {}", p.max_instances),
                    0.9,
                );
            }
            let pressure = (avg_cpu / cpu_up).max(rps_per_instance / p.target_requests_per_instance);
            let cost_impact = spend.new_instance_monthly;
            let reason = if cpu_hot {
                format!("average cpu {avg_cpu:.1}% above {cpu_up:.1}%")
            } else {
                format!(
                    "{rps_per_instance:.1} rps per instance above {:.1}",
                    p.target_requests_per_instance
                )
            };
            return ScalingDecision {
                action: ScalingAction::ScaleUp,
                current_instances: current,
                target_instances: (current + 1).min(p.max_instances),
                reason,
                confidence: (pressure - 0.5).clamp(0.5, 0.95),
                cost_impact,
                requires_approval: self.over_budget(spend.current_monthly + cost_impact),
            };
        }

        if avg_cpu < cpu_down && rps_per_instance < rps_down {
            if current <= p.min_instances {
                return maintain(
                    current,
                    format!("idle but already at minimum of {}", p.min_instances),
                    0.9,
                );
            }
            let per_instance = spend.current_monthly / f64::from(current);
            return ScalingDecision {
                action: ScalingAction::ScaleDown,
                current_instances: current,
                target_instances: current - 1,
                reason: format!(
                    "average cpu {avg_cpu:.1}% and {rps_per_instance:.1} rps per instance are idle"
                ),
                confidence: 0.7,
                cost_impact: -per_instance,
                requires_approval: false,
            };
        }

        maintain(current, "load within target band".to_string(), 0.8)
    }

    fn over_budget(&self, projected: f64) -> bool {
        let ctx = InvariantContext {
            current_spend: projected,
            budget_limit: self.policy.budget_limit,
            ..Default::default()
        };
        match self.guard.check(SPENDING_WITHIN_BUDGET, &ctx) {
            Some(check) => !check.passed,
            None => projected > self.policy.budget_limit,
        }
    }

    /// Sweep health, price the next instance, and evaluate. Inside the
    /// cooldown window only a below-minimum scale-up is let through.
    pub async fn evaluate_scaling(&self) -> ScalingDecision {
        let report = self.health.check_all_health().await;
        let spend = self.estimate_spend().await;
        let decision = self.evaluate(&report, &spend);

        if decision.action == ScalingAction::Maintain
            || report.total_instances < self.policy.min_instances
        {
            return decision;
        }

        if let Some(remaining) = self.cooldown_remaining().await {
            debug!(
                wanted = %decision.action,
                remaining_secs = remaining.as_secs(),
                "scaling suppressed by cooldown"
            );
            return maintain(
                decision.current_instances,
                format!(
                    "cooldown: {}s left before {} is allowed",
                    remaining.as_secs(),
                    decision.action
                ),
                decision.confidence,
            );
        }
        decision
    }

    async fn estimate_spend(&self) -> SpendEstimate {
        let new_instance_monthly = self
            .cheapest_scale_target()
            .await
            .map(|t| t.estimated_monthly_cost)
            .unwrap_or(0.0);
        SpendEstimate {
            current_monthly: self.instances.monthly_spend().await,
            new_instance_monthly,
        }
    }

    async fn cheapest_scale_target(&self) -> Option<DeploymentTarget> {
        self.catalog
            .find_cheapest_target(&TargetRequirements {
                min_tier: Some(SCALE_UP_MIN_TIER),
                ..Default::default()
            })
            .await
    }

    async fn cooldown_remaining(&self) -> Option<Duration> {
        let last = (*self.last_scaled.lock().await)?;
        let cooldown = Duration::from_secs(self.policy.cooldown_secs);
        cooldown.checked_sub(last.elapsed()).filter(|d| !d.is_zero())
    }

    /// Carry out a decision.
    pub async fn execute_scaling(&self, decision: &ScalingDecision) -> ScalingOutcome {
        let outcome = match decision.action {
            ScalingAction::Maintain => ScalingOutcome {
                success: true,
                ..ScalingOutcome::new(ScalingAction::Maintain)
            },
            ScalingAction::ScaleUp => self.scale_up(decision).await,
            ScalingAction::ScaleDown => self.scale_down(decision).await,
        };

        if decision.action != ScalingAction::Maintain {
            if outcome.success {
                *self.last_scaled.lock().await = Some(Instant::now());
            }
            self.events.emit(SkyforgeEvent::ScalingExecuted {
                action: decision.action,
                target_instances: decision.target_instances,
                success: outcome.success,
            });
            info!(
                action = %decision.action,
                from = decision.current_instances,
                to = decision.target_instances,
                success = outcome.success,
                pending_approval = outcome.pending_approval,
                "scaling executed"
            );
        }
        outcome
    }

    async fn scale_up(&self, decision: &ScalingDecision) -> ScalingOutcome {
        let mut outcome = ScalingOutcome::new(ScalingAction::ScaleUp);
        let Some(target) = self.cheapest_scale_target().await else {
            return ScalingOutcome::failed(ScalingAction::ScaleUp, "no eligible target for scale-up");
        };

        let missing = decision
            .target_instances
            .saturating_sub(decision.current_instances)
            .max(1);

        for _ in 0..missing {
            let request =
                PlanRequest::new(format!("autoscale: {}", decision.reason)).with_target(target.clone());
            let request = if decision.requires_approval {
                request.require_approval(format!(
                    "scale-up projects spend over the ${:.2} scaling budget",
                    self.policy.budget_limit
                ))
            } else {
                request.urgent()
            };

            let plan = match self.planner.create_plan(request).await {
                Ok(plan) => plan,
                Err(e) => {
                    outcome.error = Some(e.to_string());
                    return outcome;
                }
            };
            outcome.plan_ids.push(plan.id.clone());

            if plan.requires_approval || decision.requires_approval {
                info!(plan = %plan.id, "scale-up plan awaits approval");
                outcome.pending_approval = true;
                outcome.error = Some(format!("plan {} awaits approval", plan.id));
                return outcome;
            }

            let result = self.executor.execute_plan(&plan.id, None).await;
            if !result.success {
                warn!(plan = %plan.id, error = ?result.error, "scale-up plan failed");
                outcome.error = result.error;
                return outcome;
            }
            if let Some(instance) = result.instance {
                outcome.instance_ids.push(instance.id);
            }
        }

        outcome.success = true;
        outcome
    }

    async fn scale_down(&self, decision: &ScalingDecision) -> ScalingOutcome {
        let live = self.instances.live_count().await as u32;
        if live <= self.policy.min_instances {
            return ScalingOutcome::failed(
                ScalingAction::ScaleDown,
                format!("{live} live instance(s), minimum is {}", self.policy.min_instances),
            );
        }

        let victim = self
            .instances
            .list()
            .await
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Running)
            .min_by(|a, b| {
                a.metrics
                    .requests_per_second
                    .total_cmp(&b.metrics.requests_per_second)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
        let Some(victim) = victim else {
            return ScalingOutcome::failed(ScalingAction::ScaleDown, "no running instance to remove");
        };

        debug!(
            instance = %victim.id,
            rps = victim.metrics.requests_per_second,
            reason = %decision.reason,
            "scaling down"
        );
        if !self.executor.terminate_instance(&victim.id).await {
            return ScalingOutcome::failed(
                ScalingAction::ScaleDown,
                format!("termination of {} refused", victim.id),
            );
        }

        ScalingOutcome {
            success: true,
            instance_ids: vec![victim.id],
            ..ScalingOutcome::new(ScalingAction::ScaleDown)
        }
    }

    /// Evaluate and scale every `interval` until `shutdown` turns true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let decision = self.evaluate_scaling().await;
                    if decision.action == ScalingAction::Maintain {
                        debug!(reason = %decision.reason, "no scaling needed");
                        continue;
                    }
                    let outcome = self.execute_scaling(&decision).await;
                    if !outcome.success && !outcome.pending_approval {
                        warn!(action = %decision.action, error = ?outcome.error, "scaling action failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

fn maintain(current: u32, reason: String, confidence: f64) -> ScalingDecision {
    ScalingDecision {
        action: ScalingAction::Maintain,
        current_instances: current,
        target_instances: current,
        reason,
        confidence,
        cost_impact: 0.0,
        requires_approval: false,
    }
}
