//! End-to-end tests for the orchestrator over stub providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use skyforge_catalog::TargetFilter;
use skyforge_core::*;
use skyforge_guard::MIN_HEALTHY;
use skyforge_planner::{PlanRequest, check_traffic_safety};
use skyforge_provider::{AdapterSet, StubAdapter};
use skyforge_state::SkyforgeEvent;
use skyforged::{Orchestrator, stub_adapters};

const FAST_EXECUTOR: &str = r#"
[executor]
simulated_step_delay = "10ms"
"#;

fn fly_only(toml: &str) -> (Orchestrator, Arc<StubAdapter>) {
    let config = SkyforgeConfig::from_toml_str(&format!("{FAST_EXECUTOR}\n{toml}")).unwrap();
    let fly = Arc::new(StubAdapter::fly());
    let orch = Orchestrator::new(&config, AdapterSet::new().with(fly.clone())).unwrap();
    (orch, fly)
}

async fn deploy(orch: &Orchestrator) -> Instance {
    let plan = orch
        .create_plan(PlanRequest::new("test deployment"))
        .await
        .unwrap();
    let result = orch.execute_plan(&plan.id, None).await;
    assert!(result.success, "deploy failed: {:?}", result.error);
    result.instance.unwrap()
}

fn metrics(cpu_percent: f64, requests_per_second: f64) -> InstanceMetrics {
    InstanceMetrics {
        cpu_percent,
        requests_per_second,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn cheap_plan_is_a_draft() {
    let (orch, _) = fly_only("");
    let plan = orch
        .create_plan(PlanRequest::new("first deploy"))
        .await
        .unwrap();

    assert!(plan.estimated_cost.monthly < orch.constraints().max_spending_without_approval);
    assert!(!plan.requires_approval);
    assert_eq!(plan.status, PlanStatus::Draft);
    assert_eq!(orch.plans().get(&plan.id).await.unwrap(), plan);
}

#[tokio::test(start_paused = true)]
async fn expensive_plan_waits_for_approval() {
    let (orch, fly) = fly_only(
        r#"
[constraints]
max_spending_without_approval = 20.0
"#,
    );
    let plan = orch
        .create_plan(PlanRequest::new("big box").with_min_tier(Tier::Large))
        .await
        .unwrap();

    assert!(plan.estimated_cost.monthly > 20.0);
    assert!(plan.requires_approval);
    assert_eq!(plan.status, PlanStatus::PendingApproval);

    let result = orch.execute_plan(&plan.id, None).await;
    assert!(!result.success);
    assert!(result.error.is_some());
    assert_eq!(
        orch.plans().get(&plan.id).await.unwrap().status,
        PlanStatus::PendingApproval
    );
    assert_eq!(fly.calls("provision").await, 0);

    let result = orch
        .execute_plan(&plan.id, Some(&Approval::granted("alice")))
        .await;
    assert!(result.success, "error: {:?}", result.error);
    let stored = orch.plans().get(&plan.id).await.unwrap();
    assert_eq!(stored.status, PlanStatus::Completed);
    assert_eq!(stored.approved_by.as_deref(), Some("alice"));
}

#[tokio::test(start_paused = true)]
async fn failed_plan_runs_each_rollback_action_once() {
    let (orch, fly) = fly_only("");
    fly.update_faults(|f| f.deploy_failures = 100).await;

    let plan = orch
        .create_plan(PlanRequest::new("doomed"))
        .await
        .unwrap();
    let result = orch.execute_plan(&plan.id, None).await;

    assert!(!result.success);
    assert!(result.rolled_back);
    assert_eq!(
        orch.plans().get(&plan.id).await.unwrap().status,
        PlanStatus::RolledBack
    );
    assert_eq!(fly.calls("terminate").await, 1);
    assert!(fly.running_instances().await.is_empty());
    assert!(orch.instances().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn rollback_continues_past_a_failing_terminate() {
    let (orch, fly) = fly_only("");
    fly.update_faults(|f| {
        f.deploy_failures = 100;
        f.terminate_error = true;
    })
    .await;

    let plan = orch
        .create_plan(PlanRequest::new("doomed"))
        .await
        .unwrap();
    let result = orch.execute_plan(&plan.id, None).await;

    assert!(!result.success);
    assert!(result.rolled_back);
    // Terminate carries no retry policy in the rollback sequence.
    assert_eq!(fly.calls("terminate").await, 1);
}

#[tokio::test(start_paused = true)]
async fn termination_respects_the_healthy_floor() {
    let (orch, fly) = fly_only("");
    let first = deploy(&orch).await;

    assert!(!orch.terminate_instance(&first.id).await);
    assert_eq!(orch.instances().len().await, 1);
    assert_eq!(orch.instances().get(&first.id).await.unwrap(), first);
    assert_eq!(fly.calls("terminate").await, 0);

    let second = deploy(&orch).await;
    assert!(orch.terminate_instance(&first.id).await);
    assert!(orch.instances().get(&first.id).await.is_none());
    assert!(orch.instances().get(&second.id).await.is_some());
    assert!(!orch.terminate_instance("inst-missing").await);
}

#[tokio::test(start_paused = true)]
async fn hot_fleet_scales_up_by_one() {
    let (orch, fly) = fly_only("");
    for inst in [deploy(&orch).await, deploy(&orch).await] {
        fly.set_metrics(&inst.id, metrics(85.0, 20.0)).await;
    }

    let decision = orch.evaluate_scaling().await;
    assert_eq!(decision.action, ScalingAction::ScaleUp);
    assert_eq!(decision.current_instances, 2);
    assert_eq!(decision.target_instances, 3);
    assert!(!decision.requires_approval);

    let outcome = orch.execute_scaling(&decision).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(orch.instances().live_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn idle_fleet_scales_down_by_one() {
    let (orch, fly) = fly_only("");
    let mut ids = Vec::new();
    for _ in 0..3 {
        let inst = deploy(&orch).await;
        fly.set_metrics(&inst.id, metrics(10.0, 1.0)).await;
        ids.push(inst.id);
    }

    let decision = orch.evaluate_scaling().await;
    assert_eq!(decision.action, ScalingAction::ScaleDown);
    assert_eq!(decision.target_instances, 2);
    assert!(decision.cost_impact < 0.0);

    let outcome = orch.execute_scaling(&decision).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(orch.instances().live_count().await, 2);
    assert_eq!(fly.calls("terminate").await, 1);

    // Inside the cooldown window nothing else happens.
    let next = orch.evaluate_scaling().await;
    assert_eq!(next.action, ScalingAction::Maintain);
}

#[tokio::test(start_paused = true)]
async fn discovery_honours_max_cost_and_sorts() {
    let config = SkyforgeConfig::from_toml_str(FAST_EXECUTOR).unwrap();
    let orch = Orchestrator::new(&config, stub_adapters(&Provider::ALL)).unwrap();

    let targets = orch
        .discover_targets(&TargetFilter {
            max_cost: Some(10.0),
            ..Default::default()
        })
        .await;

    assert!(!targets.is_empty());
    assert!(targets.iter().all(|t| t.estimated_monthly_cost <= 10.0));
    assert!(
        targets
            .windows(2)
            .all(|w| w[0].estimated_monthly_cost <= w[1].estimated_monthly_cost)
    );
    let providers: Vec<Provider> = targets.iter().map(|t| t.provider).collect();
    assert!(providers.contains(&Provider::Fly));
    assert!(providers.contains(&Provider::CloudflareWorkers));
}

#[tokio::test(start_paused = true)]
async fn traffic_is_withdrawn_before_termination() {
    let config = SkyforgeConfig::from_toml_str(FAST_EXECUTOR).unwrap();
    let orch = Orchestrator::from_config_with_stubs(&config).unwrap();

    for tier in [Tier::Nano, Tier::Small, Tier::Xlarge] {
        let plan = orch
            .create_plan(PlanRequest::new("traffic order").with_min_tier(tier))
            .await
            .unwrap();
        let mut sequence = plan.actions.clone();
        sequence.extend(plan.rollback_plan.actions.iter().cloned());
        assert!(check_traffic_safety(&sequence).is_ok());

        let terminate_at = sequence
            .iter()
            .position(|a| a.action_type() == ActionType::TerminateInstance)
            .unwrap();
        assert!(sequence[terminate_at..].iter().all(|a| !matches!(
            a.kind,
            ActionKind::RouteTraffic { weight } if weight > 0.0
        )));
    }
}

#[tokio::test(start_paused = true)]
async fn invariants_track_the_fleet() {
    let (orch, _) = fly_only("");

    let failing = orch.check_invariants().await;
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].id, MIN_HEALTHY);

    deploy(&orch).await;
    assert!(orch.check_invariants().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn status_reports_fleet_and_plans() {
    let (orch, _) = fly_only("");
    let inst = deploy(&orch).await;
    orch.create_plan(PlanRequest::new("spare")).await.unwrap();

    let status = orch.status().await;
    assert_eq!(status.live_instances, 1);
    assert_eq!(status.instances.len(), 1);
    assert!((status.monthly_spend - inst.target.estimated_monthly_cost).abs() < 1e-9);
    assert_eq!(status.plans.get("completed"), Some(&1));
    assert_eq!(status.plans.get("draft"), Some(&1));

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["live_instances"], 1);
}

#[tokio::test(start_paused = true)]
async fn env_update_and_resize_go_through_the_provider() {
    let (orch, fly) = fly_only("");
    let inst = deploy(&orch).await;

    let env = HashMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]);
    orch.update_instance_env(&inst.id, &env).await.unwrap();
    assert!(fly.calls("update_env").await >= 2);

    let resized = orch.resize_instance(&inst.id, Tier::Medium).await.unwrap();
    assert_eq!(resized.target.tier, Tier::Medium);
    assert_eq!(fly.calls("scale").await, 1);
    assert_eq!(orch.instances().get(&inst.id).await.unwrap(), resized);

    assert!(orch.resize_instance("inst-missing", Tier::Small).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_reach_subscribers() {
    let (orch, _) = fly_only("");
    let mut rx = orch.subscribe();
    let inst = deploy(&orch).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events[0], SkyforgeEvent::PlanCreated { requires_approval: false, .. }));
    assert!(events.contains(&SkyforgeEvent::InstanceRegistered {
        instance_id: inst.id.clone()
    }));
}

#[tokio::test(start_paused = true)]
async fn control_loop_sweeps_until_shutdown() {
    let (orch, fly) = fly_only(
        r#"
[monitor]
interval = "10s"
autoscale_interval = "1m"
"#,
    );
    let orch = Arc::new(orch);
    let inst = deploy(&orch).await;
    let before = fly.calls("health_check").await;

    let looping = orch.clone();
    let handle = tokio::spawn(async move { looping.run_control_loop().await });

    tokio::time::sleep(Duration::from_secs(35)).await;
    orch.shutdown();
    handle.await.unwrap();

    assert!(fly.calls("health_check").await >= before + 3);
    let checked = orch.instances().get(&inst.id).await.unwrap();
    assert!(checked.last_health_check.is_some());
}
