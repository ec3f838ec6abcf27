//! Action sequences for new-capacity plans and their rollbacks.

use std::collections::HashMap;

use skyforge_core::*;

/// Share of traffic a freshly deployed instance receives.
pub const INITIAL_TRAFFIC_WEIGHT: f64 = 0.1;

fn action(kind: ActionKind, target: &DeploymentTarget, secs: u64, retry: RetryPolicy) -> DeploymentAction {
    DeploymentAction {
        kind,
        target: Some(target.clone()),
        instance_id: None,
        estimated_duration_secs: secs,
        retry_policy: retry,
    }
}

/// The six-step sequence that brings up one instance on `target`.
///
/// build-container → provision-instance → configure-env → deploy-container
/// → health-check → route-traffic(0.1). Provision and deploy talk to the
/// provider API and get the most generous retry policies.
pub fn deployment_actions(
    target: &DeploymentTarget,
    defaults: &DeploymentDefaults,
    instance_name: &str,
) -> Vec<DeploymentAction> {
    let mut labels = defaults.labels.clone();
    labels.insert("managed-by".to_string(), "skyforge".to_string());
    labels.insert("tier".to_string(), target.tier.to_string());

    let config = ProvisionConfig {
        name: instance_name.to_string(),
        version: defaults.version.clone(),
        env: defaults.env.clone(),
        secrets: HashMap::new(),
        labels,
    };

    let container = ContainerSpec {
        image: defaults.image.clone(),
        tag: defaults.tag.clone(),
        port: defaults.port,
        health_check_path: defaults.health_check_path.clone(),
        env: defaults.env.clone(),
        resources: ContainerResources {
            cpu: defaults.cpu,
            memory_mb: defaults.memory_mb,
        },
    };

    vec![
        action(
            ActionKind::BuildContainer {
                image: defaults.image.clone(),
                tag: defaults.tag.clone(),
            },
            target,
            120,
            RetryPolicy::new(1, 5_000, 2.0, 10_000),
        ),
        action(
            ActionKind::ProvisionInstance { config },
            target,
            60,
            RetryPolicy::new(3, 2_000, 2.0, 30_000),
        ),
        action(
            ActionKind::ConfigureEnv {
                env: defaults.env.clone(),
            },
            target,
            10,
            RetryPolicy::new(2, 1_000, 2.0, 5_000),
        ),
        action(
            ActionKind::DeployContainer { container },
            target,
            90,
            RetryPolicy::new(3, 2_000, 2.0, 30_000),
        ),
        action(
            ActionKind::HealthCheck,
            target,
            30,
            RetryPolicy::new(5, 3_000, 1.5, 15_000),
        ),
        action(
            ActionKind::RouteTraffic {
                weight: INITIAL_TRAFFIC_WEIGHT,
            },
            target,
            10,
            RetryPolicy::new(2, 1_000, 2.0, 5_000),
        ),
    ]
}

/// Withdraw traffic, then terminate. Each step runs exactly once.
pub fn rollback_plan(target: &DeploymentTarget) -> RollbackPlan {
    let actions = vec![
        action(
            ActionKind::RouteTraffic { weight: 0.0 },
            target,
            5,
            RetryPolicy::none(),
        ),
        action(ActionKind::TerminateInstance, target, 30, RetryPolicy::none()),
    ];
    RollbackPlan {
        estimated_duration_secs: actions.iter().map(|a| a.estimated_duration_secs).sum(),
        actions,
        data_preservation: false,
    }
}

/// Verify that traffic only reaches checked instances and is withdrawn
/// before termination.
///
/// Fails if a `route-traffic(weight > 0)` appears before any passing
/// `health-check`, or anywhere after a `terminate-instance`.
pub fn check_traffic_safety(actions: &[DeploymentAction]) -> Result<(), String> {
    let mut health_checked = false;
    let mut terminated = false;

    for (i, a) in actions.iter().enumerate() {
        match &a.kind {
            ActionKind::HealthCheck => health_checked = true,
            ActionKind::TerminateInstance => terminated = true,
            ActionKind::RouteTraffic { weight } if *weight > 0.0 => {
                if terminated {
                    return Err(format!("step {i}: traffic routed after termination"));
                }
                if !health_checked {
                    return Err(format!("step {i}: traffic routed before a health check"));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
