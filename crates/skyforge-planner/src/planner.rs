//! Deployment planner.
//!
//! Turns a request for new capacity into a costed, risk-assessed
//! [`DeploymentPlan`] and stores it in the plan registry. The planner
//! never talks to providers beyond pricing; execution is the executor's job.

use std::sync::Arc;

use tracing::{debug, info, warn};

use skyforge_catalog::{TargetCatalog, TargetRequirements};
use skyforge_core::*;
use skyforge_guard::{InvariantContext, InvariantRegistry, SPENDING_WITHIN_BUDGET};
use skyforge_provider::AdapterSet;
use skyforge_state::{EventBus, InstanceRegistry, PlanRegistry, SkyforgeEvent, generate_id};

use crate::actions::{check_traffic_safety, deployment_actions, rollback_plan};
use crate::error::{PlannerError, PlannerResult};
use crate::risk::{RiskInputs, assess_risk};

/// What the caller wants deployed.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Explicit target; the cheapest eligible target is chosen when absent.
    pub target: Option<DeploymentTarget>,
    pub reason: String,
    /// Urgent plans skip the spending approval gate.
    pub urgent: bool,
    pub min_tier: Option<Tier>,
    /// Forces the plan to wait for approval, whatever the cost gate says.
    pub approval_required: Option<String>,
}

impl PlanRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: DeploymentTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn with_min_tier(mut self, tier: Tier) -> Self {
        self.min_tier = Some(tier);
        self
    }

    pub fn require_approval(mut self, reason: impl Into<String>) -> Self {
        self.approval_required = Some(reason.into());
        self
    }
}

/// Builds deployment plans.
pub struct DeploymentPlanner {
    catalog: Arc<TargetCatalog>,
    adapters: AdapterSet,
    instances: InstanceRegistry,
    plans: PlanRegistry,
    guard: Arc<InvariantRegistry>,
    constraints: SafetyConstraints,
    defaults: DeploymentDefaults,
    events: EventBus,
}

impl DeploymentPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<TargetCatalog>,
        adapters: AdapterSet,
        instances: InstanceRegistry,
        plans: PlanRegistry,
        guard: Arc<InvariantRegistry>,
        constraints: SafetyConstraints,
        defaults: DeploymentDefaults,
        events: EventBus,
    ) -> Self {
        Self {
            catalog,
            adapters,
            instances,
            plans,
            guard,
            constraints,
            defaults,
            events,
        }
    }

    pub fn constraints(&self) -> &SafetyConstraints {
        &self.constraints
    }

    /// Build and store a plan for one new instance.
    ///
    /// A plan needs approval when its monthly cost exceeds
    /// `max_spending_without_approval`, when it would push projected spend
    /// over `monthly_budget_limit`, or when it contains an action listed in
    /// `approval_required_actions`. Urgent requests skip the first two
    /// checks but never the third.
    pub async fn create_plan(&self, req: PlanRequest) -> PlannerResult<DeploymentPlan> {
        let target = match req.target {
            Some(target) => {
                if self.constraints.is_blocked(&target) {
                    return Err(PlannerError::Blocked(target.id));
                }
                target
            }
            None => self
                .catalog
                .find_cheapest_target(&TargetRequirements {
                    min_tier: req.min_tier,
                    ..Default::default()
                })
                .await
                .ok_or(PlannerError::NoTarget)?,
        };

        let estimated_cost = self.price_target(&target).await;
        let current_spend = self.instances.monthly_spend().await;
        let projected_spend = current_spend + estimated_cost.monthly;
        let live_instances = self.instances.live_count().await;

        let plan_id = generate_id("plan");
        let instance_name = format!("{}-{}", self.defaults.name, short_suffix(&plan_id));
        let actions = deployment_actions(&target, &self.defaults, &instance_name);
        let rollback = rollback_plan(&target);

        let mut sequence = actions.clone();
        sequence.extend(rollback.actions.iter().cloned());
        check_traffic_safety(&sequence).map_err(PlannerError::UnsafeSequence)?;

        let mut cost_reasons = Vec::new();
        if estimated_cost.monthly > self.constraints.max_spending_without_approval {
            cost_reasons.push(format!(
                "monthly cost ${:.2} exceeds ${:.2} approval threshold",
                estimated_cost.monthly, self.constraints.max_spending_without_approval
            ));
        }
        let ctx = InvariantContext {
            current_spend: projected_spend,
            budget_limit: self.constraints.monthly_budget_limit,
            ..Default::default()
        };
        if let Some(message) = self.budget_violation(&ctx) {
            cost_reasons.push(format!("projected {message}"));
        }

        let policy_reasons: Vec<String> = actions
            .iter()
            .map(|a| a.action_type())
            .filter(|t| self.constraints.approval_required_actions.contains(t))
            .map(|t| format!("action {t} requires approval by policy"))
            .collect();

        let cost_gate = !cost_reasons.is_empty();
        let bypassed_cost_gate = req.urgent && cost_gate;
        let forced_reason = req.approval_required.clone();
        let requires_approval =
            (cost_gate && !req.urgent) || !policy_reasons.is_empty() || forced_reason.is_some();

        if bypassed_cost_gate {
            warn!(
                plan = %plan_id,
                target = %target.id,
                monthly = estimated_cost.monthly,
                "urgent plan bypasses spending approval"
            );
            if projected_spend > self.constraints.monthly_budget_limit {
                self.events.emit(SkyforgeEvent::BudgetWarning {
                    projected_monthly: projected_spend,
                    limit: self.constraints.monthly_budget_limit,
                });
            }
        }

        let approval_reason = if requires_approval {
            let mut reasons = if req.urgent { Vec::new() } else { cost_reasons };
            reasons.extend(policy_reasons);
            reasons.extend(forced_reason);
            Some(reasons.join("; "))
        } else {
            None
        };

        let risk = assess_risk(&RiskInputs {
            monthly_cost: estimated_cost.monthly,
            budget_limit: self.constraints.monthly_budget_limit,
            projected_spend,
            live_instances,
            bypassed_cost_gate,
            latency_ms: target.latency_ms,
        });

        let now = epoch_secs();
        let plan = DeploymentPlan {
            id: plan_id.clone(),
            reason: req.reason,
            expected_outcome: format!(
                "new {} instance on {} in {} receiving {:.0}% of traffic",
                target.tier,
                target.provider,
                target.region,
                crate::actions::INITIAL_TRAFFIC_WEIGHT * 100.0
            ),
            target,
            actions,
            estimated_cost,
            requires_approval,
            approval_reason,
            approved_by: None,
            risk,
            rollback_plan: rollback,
            status: if requires_approval {
                PlanStatus::PendingApproval
            } else {
                PlanStatus::Draft
            },
            created_at: now,
            updated_at: now,
        };

        self.plans.insert(plan.clone()).await?;
        self.events.emit(SkyforgeEvent::PlanCreated {
            plan_id: plan.id.clone(),
            requires_approval,
        });

        info!(
            plan = %plan.id,
            target = %plan.target.id,
            monthly = plan.estimated_cost.monthly,
            risk = ?plan.risk.level,
            requires_approval,
            "deployment plan created"
        );
        Ok(plan)
    }

    /// Message of the spending invariant when `ctx` breaks it. Compares
    /// directly when the guard carries no spending invariant.
    fn budget_violation(&self, ctx: &InvariantContext) -> Option<String> {
        match self.guard.check(SPENDING_WITHIN_BUDGET, ctx) {
            Some(check) if check.passed => None,
            Some(check) => Some(check.message.unwrap_or_else(|| over_budget_message(ctx))),
            None => (ctx.current_spend > ctx.budget_limit).then(|| over_budget_message(ctx)),
        }
    }

    /// Provider pricing, falling back to the catalog estimate.
    async fn price_target(&self, target: &DeploymentTarget) -> EstimatedCost {
        let Some(adapter) = self.adapters.for_target(target) else {
            return EstimatedCost::from_monthly(target.estimated_monthly_cost);
        };
        match adapter.get_pricing(target).await {
            Ok(cost) => cost,
            Err(e) => {
                debug!(target = %target.id, error = %e, "pricing lookup failed, using catalog estimate");
                EstimatedCost::from_monthly(target.estimated_monthly_cost)
            }
        }
    }
}

fn over_budget_message(ctx: &InvariantContext) -> String {
    format!(
        "monthly spend ${:.2} exceeds budget ${:.2}",
        ctx.current_spend, ctx.budget_limit
    )
}

/// Trailing counter of a generated id, used to name instances.
fn short_suffix(id: &str) -> &str {
    id.rsplit('-').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyforge_provider::StubAdapter;

    struct Fixture {
        planner: DeploymentPlanner,
        plans: PlanRegistry,
        events: EventBus,
    }

    fn fixture(constraints: SafetyConstraints) -> Fixture {
        fixture_with_guard(constraints, InvariantRegistry::with_baseline())
    }

    fn fixture_with_guard(constraints: SafetyConstraints, guard: InvariantRegistry) -> Fixture {
        let adapters = Provider::ALL
            .into_iter()
            .fold(AdapterSet::new(), |set, p| {
                set.with(Arc::new(StubAdapter::for_provider(p)))
            });
        let plans = PlanRegistry::new();
        let events = EventBus::default();
        let planner = DeploymentPlanner::new(
            Arc::new(TargetCatalog::new(adapters.clone(), constraints.clone())),
            adapters,
            InstanceRegistry::new(),
            plans.clone(),
            Arc::new(guard),
            constraints,
            DeploymentDefaults::default(),
            events.clone(),
        );
        Fixture {
            planner,
            plans,
            events,
        }
    }

    fn render_large() -> DeploymentTarget {
        DeploymentTarget {
            id: "render:ohio:large".to_string(),
            provider: Provider::Render,
            region: "ohio".to_string(),
            tier: Tier::Large,
            estimated_monthly_cost: 175.0,
            available: true,
            latency_ms: Some(30),
        }
    }

    #[tokio::test]
    async fn cheap_plan_is_a_draft() {
        let f = fixture(SafetyConstraints::default());
        let plan = f
            .planner
            .create_plan(PlanRequest::new("baseline capacity"))
            .await
            .unwrap();

        assert_eq!(plan.status, PlanStatus::Draft);
        assert!(!plan.requires_approval);
        assert!(plan.approval_reason.is_none());
        assert_eq!(plan.actions.len(), 6);
        assert_eq!(plan.rollback_plan.actions.len(), 2);
        assert_eq!(plan.target.provider, Provider::Fly);
        assert_eq!(f.plans.get(&plan.id).await.unwrap(), plan);
    }

    #[tokio::test]
    async fn expensive_plan_needs_approval() {
        let f = fixture(SafetyConstraints::default());
        let plan = f
            .planner
            .create_plan(PlanRequest::new("big box").with_target(render_large()))
            .await
            .unwrap();

        assert!(plan.requires_approval);
        assert_eq!(plan.status, PlanStatus::PendingApproval);
        let reason = plan.approval_reason.unwrap();
        assert!(reason.contains("175.00"), "reason was {reason}");
    }

    #[tokio::test]
    async fn plan_over_budget_needs_approval() {
        let f = fixture(SafetyConstraints {
            max_spending_without_approval: 1_000.0,
            monthly_budget_limit: 100.0,
            ..Default::default()
        });
        let plan = f
            .planner
            .create_plan(PlanRequest::new("over budget").with_target(render_large()))
            .await
            .unwrap();

        assert!(plan.requires_approval);
        assert!(plan.approval_reason.unwrap().contains("exceeds budget"));
    }

    #[tokio::test]
    async fn urgent_plan_bypasses_cost_gate() {
        let f = fixture(SafetyConstraints {
            monthly_budget_limit: 100.0,
            ..Default::default()
        });
        let mut rx = f.events.subscribe();
        let plan = f
            .planner
            .create_plan(PlanRequest::new("incident").with_target(render_large()).urgent())
            .await
            .unwrap();

        assert!(!plan.requires_approval);
        assert_eq!(plan.status, PlanStatus::Draft);
        assert!(plan.risk.factors.iter().any(|f| f.name == "approval-bypassed"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SkyforgeEvent::BudgetWarning { .. }
        ));
    }

    #[tokio::test]
    async fn policy_action_forces_approval_even_when_urgent() {
        let f = fixture(SafetyConstraints {
            approval_required_actions: vec![ActionType::ProvisionInstance],
            ..Default::default()
        });
        let plan = f
            .planner
            .create_plan(PlanRequest::new("policy").urgent())
            .await
            .unwrap();

        assert!(plan.requires_approval);
        assert_eq!(
            plan.approval_reason.as_deref(),
            Some("action provision-instance requires approval by policy")
        );
    }

    #[tokio::test]
    async fn blocked_target_is_rejected() {
        let f = fixture(SafetyConstraints {
            blocked_providers: vec![Provider::Render],
            ..Default::default()
        });
        let err = f
            .planner
            .create_plan(PlanRequest::new("blocked").with_target(render_large()))
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Blocked(id) if id == "render:ohio:large"));
    }

    #[tokio::test]
    async fn no_eligible_target_is_an_error() {
        let f = fixture(SafetyConstraints {
            max_cost_per_instance: 0.5,
            ..Default::default()
        });
        let err = f
            .planner
            .create_plan(PlanRequest::new("nothing fits"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::NoTarget));
    }

    #[tokio::test]
    async fn min_tier_and_outcome_are_honoured() {
        let f = fixture(SafetyConstraints::default());
        let plan = f
            .planner
            .create_plan(PlanRequest::new("medium").with_min_tier(Tier::Medium))
            .await
            .unwrap();
        assert!(plan.target.tier >= Tier::Medium);
        assert!(plan.expected_outcome.contains("10% of traffic"));
        assert!(plan.created_at > 0);
    }

    #[tokio::test]
    async fn plans_get_distinct_ids() {
        let f = fixture(SafetyConstraints::default());
        let a = f.planner.create_plan(PlanRequest::new("a")).await.unwrap();
        let b = f.planner.create_plan(PlanRequest::new("b")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(f.plans.list().await.len(), 2);
    }

    #[tokio::test]
    async fn budget_gate_holds_without_spending_invariant() {
        let f = fixture_with_guard(
            SafetyConstraints {
                max_spending_without_approval: 1_000.0,
                monthly_budget_limit: 100.0,
                ..Default::default()
            },
            InvariantRegistry::new(),
        );
        let plan = f
            .planner
            .create_plan(PlanRequest::new("over budget").with_target(render_large()))
            .await
            .unwrap();

        assert!(plan.requires_approval);
        assert_eq!(plan.status, PlanStatus::PendingApproval);
        let reason = plan.approval_reason.unwrap();
        assert!(reason.contains("exceeds budget $100.00"), "reason was {reason}");
    }

    #[tokio::test]
    async fn required_approval_overrides_cheap_draft() {
        let f = fixture(SafetyConstraints::default());
        let plan = f
            .planner
            .create_plan(
                PlanRequest::new("scale-up").require_approval("scaling budget exceeded"),
            )
            .await
            .unwrap();

        assert!(plan.estimated_cost.monthly < 50.0);
        assert!(plan.requires_approval);
        assert_eq!(plan.status, PlanStatus::PendingApproval);
        assert_eq!(plan.approval_reason.as_deref(), Some("scaling budget exceeded"));
    }
}
