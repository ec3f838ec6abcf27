//! Domain types shared by every skyforge crate.
//!
//! Targets, instances, plans, actions, policies, and the reports that flow
//! between the health monitor and the autoscaler. All types serialize to
//! JSON so they can be logged, exported, or swapped into a persistent store.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment target (`{provider}:{region}:{tier}`).
pub type TargetId = String;

/// Unique identifier for a live instance.
pub type InstanceId = String;

/// Unique identifier for a deployment plan.
pub type PlanId = String;

// ── Providers & tiers ─────────────────────────────────────────────

/// Cloud providers skyforge knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Aws,
    Fly,
    Railway,
    Render,
    CloudflareWorkers,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Aws,
        Provider::Fly,
        Provider::Railway,
        Provider::Render,
        Provider::CloudflareWorkers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Fly => "fly",
            Provider::Railway => "railway",
            Provider::Render => "render",
            Provider::CloudflareWorkers => "cloudflare-workers",
        }
    }

    /// Parse a provider name as written in config files and CLI flags.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s.trim())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse resource class used to compare targets across providers.
///
/// The declaration order is the tier ordering: `Nano < Micro < ... < Xlarge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Nano,
    Micro,
    Small,
    Medium,
    Large,
    Xlarge,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::Nano,
        Tier::Micro,
        Tier::Small,
        Tier::Medium,
        Tier::Large,
        Tier::Xlarge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Nano => "nano",
            Tier::Micro => "micro",
            Tier::Small => "small",
            Tier::Medium => "medium",
            Tier::Large => "large",
            Tier::Xlarge => "xlarge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s.trim())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Targets & pricing ─────────────────────────────────────────────

/// A provisionable (provider, region, tier) combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentTarget {
    pub id: TargetId,
    pub provider: Provider,
    pub region: String,
    pub tier: Tier,
    /// Estimated cost in USD per month of continuous running.
    pub estimated_monthly_cost: f64,
    pub available: bool,
    /// Estimated round-trip latency to the region, when known.
    pub latency_ms: Option<u32>,
}

impl DeploymentTarget {
    /// Build the canonical target id.
    pub fn make_id(provider: Provider, region: &str, tier: Tier) -> TargetId {
        format!("{provider}:{region}:{tier}")
    }
}

/// Hours in the 30-day billing month used for hourly/monthly conversion.
pub const HOURS_PER_MONTH: f64 = 720.0;

/// Cost estimate for running one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimatedCost {
    pub hourly: f64,
    pub monthly: f64,
    pub currency: String,
}

impl EstimatedCost {
    /// Derive an hourly rate from a monthly estimate.
    pub fn from_monthly(monthly: f64) -> Self {
        Self {
            hourly: monthly / HOURS_PER_MONTH,
            monthly,
            currency: "USD".to_string(),
        }
    }

    pub fn zero() -> Self {
        Self::from_monthly(0.0)
    }
}

// ── Instances ─────────────────────────────────────────────────────

/// Lifecycle status of a provisioned instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceStatus {
    Provisioning,
    Starting,
    Running,
    Degraded,
    Stopping,
    Stopped,
    Failed,
    Terminated,
}

impl InstanceStatus {
    /// Whether the instance still counts towards the live fleet.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Provisioning
                | InstanceStatus::Starting
                | InstanceStatus::Running
                | InstanceStatus::Degraded
        )
    }
}

/// Result of a single health check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
    /// Unix timestamp (seconds) of the check.
    pub checked_at: u64,
}

impl HealthStatus {
    /// Health of an instance that has never been checked.
    pub fn unknown() -> Self {
        Self {
            healthy: false,
            message: Some("not checked yet".to_string()),
            response_time_ms: None,
            checked_at: 0,
        }
    }

    pub fn healthy(checked_at: u64, response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            message: None,
            response_time_ms: Some(response_time_ms),
            checked_at,
        }
    }

    pub fn unhealthy(checked_at: u64, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
            response_time_ms: None,
            checked_at,
        }
    }
}

/// Point-in-time resource and traffic metrics for one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceMetrics {
    /// CPU utilization, 0–100.
    pub cpu_percent: f64,
    /// Memory utilization, 0–100.
    pub memory_percent: f64,
    pub requests_per_second: f64,
    /// Error rate (0.0–1.0).
    pub error_rate: f64,
    pub latency_p99_ms: f64,
}

/// A live deployment bound to a specific target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub target: DeploymentTarget,
    pub status: InstanceStatus,
    pub endpoint: Option<String>,
    pub health: HealthStatus,
    pub metrics: InstanceMetrics,
    /// USD spent on this instance so far.
    pub accumulated_cost: f64,
    pub version: String,
    /// Unix timestamp (seconds) when the instance was provisioned.
    pub created_at: u64,
    pub last_health_check: Option<u64>,
    /// Share of traffic routed to this instance (0.0 = none).
    pub traffic_weight: f64,
}

impl Instance {
    pub fn receives_traffic(&self) -> bool {
        self.traffic_weight > 0.0
    }
}

// ── Actions ───────────────────────────────────────────────────────

/// Per-action retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_ms: u64, backoff_multiplier: f64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
            backoff_multiplier,
            max_backoff_ms,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, 0, 1.0, 0)
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let ms = (self.backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// Instance configuration handed to `provision`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProvisionConfig {
    pub name: String,
    pub version: String,
    pub env: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

/// Resource request for a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerResources {
    pub cpu: f64,
    pub memory_mb: u32,
}

/// Container handed to `deploy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub tag: String,
    pub port: u16,
    pub health_check_path: String,
    pub env: HashMap<String, String>,
    pub resources: ContainerResources,
}

/// Fieldless discriminant of [`ActionKind`], used in policy sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    ProvisionInstance,
    BuildContainer,
    ConfigureEnv,
    DeployContainer,
    HealthCheck,
    RouteTraffic,
    ScaleUp,
    ScaleDown,
    TerminateInstance,
    UpdateDns,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ProvisionInstance => "provision-instance",
            ActionType::BuildContainer => "build-container",
            ActionType::ConfigureEnv => "configure-env",
            ActionType::DeployContainer => "deploy-container",
            ActionType::HealthCheck => "health-check",
            ActionType::RouteTraffic => "route-traffic",
            ActionType::ScaleUp => "scale-up",
            ActionType::ScaleDown => "scale-down",
            ActionType::TerminateInstance => "terminate-instance",
            ActionType::UpdateDns => "update-dns",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        use ActionType::*;
        [
            ProvisionInstance,
            BuildContainer,
            ConfigureEnv,
            DeployContainer,
            HealthCheck,
            RouteTraffic,
            ScaleUp,
            ScaleDown,
            TerminateInstance,
            UpdateDns,
        ]
        .into_iter()
        .find(|t| t.as_str() == s.trim())
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single plan step does, with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionKind {
    ProvisionInstance { config: ProvisionConfig },
    BuildContainer { image: String, tag: String },
    ConfigureEnv { env: HashMap<String, String> },
    DeployContainer { container: ContainerSpec },
    HealthCheck,
    RouteTraffic { weight: f64 },
    ScaleUp { tier: Tier },
    ScaleDown { tier: Tier },
    TerminateInstance,
    UpdateDns { hostname: String },
}

impl ActionKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionKind::ProvisionInstance { .. } => ActionType::ProvisionInstance,
            ActionKind::BuildContainer { .. } => ActionType::BuildContainer,
            ActionKind::ConfigureEnv { .. } => ActionType::ConfigureEnv,
            ActionKind::DeployContainer { .. } => ActionType::DeployContainer,
            ActionKind::HealthCheck => ActionType::HealthCheck,
            ActionKind::RouteTraffic { .. } => ActionType::RouteTraffic,
            ActionKind::ScaleUp { .. } => ActionType::ScaleUp,
            ActionKind::ScaleDown { .. } => ActionType::ScaleDown,
            ActionKind::TerminateInstance => ActionType::TerminateInstance,
            ActionKind::UpdateDns { .. } => ActionType::UpdateDns,
        }
    }
}

/// A single step of a plan. Immutable once part of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentAction {
    pub kind: ActionKind,
    pub target: Option<DeploymentTarget>,
    pub instance_id: Option<InstanceId>,
    pub estimated_duration_secs: u64,
    pub retry_policy: RetryPolicy,
}

impl DeploymentAction {
    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }
}

// ── Plans ─────────────────────────────────────────────────────────

/// Plan lifecycle. Strictly forward; only `Failed -> RolledBack` follows a
/// terminal-looking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStatus {
    Draft,
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

impl PlanStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (self, next),
            (Draft, Approved)
                | (Draft, Executing)
                | (PendingApproval, Approved)
                | (Approved, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Failed, RolledBack)
        )
    }

    /// Whether `execute_plan` may start from this status.
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            PlanStatus::Draft | PlanStatus::PendingApproval | PlanStatus::Approved
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::PendingApproval => "pending-approval",
            PlanStatus::Approved => "approved",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map an average severity to a level. Averages above 1.0 are critical.
    pub fn from_average_severity(avg: f64) -> Self {
        if avg > 0.7 {
            RiskLevel::Critical
        } else if avg > 0.5 {
            RiskLevel::High
        } else if avg > 0.2 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFactor {
    pub name: String,
    /// Usually 0.0 to 1.0. A cost ratio over budget goes higher.
    pub severity: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub mitigations: Vec<String>,
}

/// Compensating action sequence attached to every plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackPlan {
    pub actions: Vec<DeploymentAction>,
    pub estimated_duration_secs: u64,
    pub data_preservation: bool,
}

/// An ordered, retryable sequence of actions with its rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentPlan {
    pub id: PlanId,
    pub reason: String,
    pub target: DeploymentTarget,
    pub actions: Vec<DeploymentAction>,
    pub estimated_cost: EstimatedCost,
    pub requires_approval: bool,
    pub approval_reason: Option<String>,
    pub approved_by: Option<String>,
    pub risk: RiskAssessment,
    pub expected_outcome: String,
    pub rollback_plan: RollbackPlan,
    pub status: PlanStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// External approval token for a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approval {
    pub approved: bool,
    pub approved_by: String,
}

impl Approval {
    pub fn granted(by: impl Into<String>) -> Self {
        Self {
            approved: true,
            approved_by: by.into(),
        }
    }
}

// ── Policies ──────────────────────────────────────────────────────

/// Budget ceilings, instance bounds, and policy sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyConstraints {
    pub max_spending_without_approval: f64,
    pub monthly_budget_limit: f64,
    pub max_cost_per_instance: f64,
    pub max_total_instances: u32,
    pub min_healthy_instances: u32,
    pub blocked_providers: Vec<Provider>,
    pub blocked_regions: Vec<String>,
    /// Action types that force approval regardless of urgency.
    pub approval_required_actions: Vec<ActionType>,
}

impl Default for SafetyConstraints {
    fn default() -> Self {
        Self {
            max_spending_without_approval: 50.0,
            monthly_budget_limit: 500.0,
            max_cost_per_instance: 200.0,
            max_total_instances: 10,
            min_healthy_instances: 1,
            blocked_providers: Vec::new(),
            blocked_regions: Vec::new(),
            approval_required_actions: Vec::new(),
        }
    }
}

impl SafetyConstraints {
    pub fn is_blocked(&self, target: &DeploymentTarget) -> bool {
        self.blocked_providers.contains(&target.provider)
            || self.blocked_regions.iter().any(|r| r == &target.region)
    }
}

/// Autoscaling parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    pub min_instances: u32,
    pub max_instances: u32,
    /// Target CPU utilization as a fraction (0.7 = 70%).
    pub target_cpu_utilization: f64,
    pub target_requests_per_instance: f64,
    pub cooldown_secs: u64,
    /// Multiplier on the CPU target above which to scale up.
    pub scale_up_threshold: f64,
    /// Multiplier on the CPU target below which to consider scaling down.
    pub scale_down_threshold: f64,
    /// Fraction of the RPS target below which to consider scaling down.
    pub scale_down_rps_ratio: f64,
    /// Monthly spend above which scale-up needs approval.
    pub budget_limit: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 5,
            target_cpu_utilization: 0.7,
            target_requests_per_instance: 100.0,
            cooldown_secs: 300,
            scale_up_threshold: 1.0,
            scale_down_threshold: 0.5,
            scale_down_rps_ratio: 0.3,
            budget_limit: 500.0,
        }
    }
}

// ── Scaling & health reports ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Maintain,
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalingAction::ScaleUp => "scale-up",
            ScalingAction::ScaleDown => "scale-down",
            ScalingAction::Maintain => "maintain",
        })
    }
}

/// Output of one autoscaler evaluation. Consumed immediately, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub current_instances: u32,
    pub target_instances: u32,
    pub reason: String,
    /// 0.0–1.0.
    pub confidence: f64,
    /// Monthly cost delta in USD (negative when scaling down).
    pub cost_impact: f64,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Degraded,
}

/// Health and metrics of one instance as seen by a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceHealth {
    pub instance_id: InstanceId,
    pub health: HealthStatus,
    pub metrics: Option<InstanceMetrics>,
    pub receives_traffic: bool,
}

/// System-wide health, the sole input of the autoscaler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub instances: Vec<InstanceHealth>,
    pub total_instances: u32,
    pub healthy_instances: u32,
    pub unhealthy_instances: u32,
    pub unhealthy_with_traffic: u32,
    pub system_health: SystemHealth,
    pub checked_at: u64,
}

impl HealthReport {
    /// Average CPU across instances that reported metrics.
    pub fn average_cpu(&self) -> f64 {
        let samples: Vec<f64> = self
            .instances
            .iter()
            .filter_map(|i| i.metrics.as_ref().map(|m| m.cpu_percent))
            .collect();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    pub fn total_rps(&self) -> f64 {
        self.instances
            .iter()
            .filter_map(|i| i.metrics.as_ref().map(|m| m.requests_per_second))
            .sum()
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_matches_declaration() {
        assert!(Tier::Nano < Tier::Micro);
        assert!(Tier::Small < Tier::Medium);
        assert!(Tier::Large < Tier::Xlarge);
        assert_eq!(Tier::parse("medium"), Some(Tier::Medium));
        assert_eq!(Tier::parse("huge"), None);
    }

    #[test]
    fn provider_names_roundtrip() {
        for p in Provider::ALL {
            assert_eq!(Provider::parse(p.as_str()), Some(p));
        }
        let json = serde_json::to_string(&Provider::CloudflareWorkers).unwrap();
        assert_eq!(json, "\"cloudflare-workers\"");
    }

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        let policy = RetryPolicy::new(5, 1000, 2.0, 5000);
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.delay_after(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(5000));
        assert_eq!(policy.delay_after(10), Duration::from_millis(5000));
    }

    #[test]
    fn plan_status_is_forward_only() {
        use PlanStatus::*;
        assert!(Draft.can_transition_to(Executing));
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(!PendingApproval.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RolledBack));
        assert!(!Completed.can_transition_to(Executing));
        assert!(!RolledBack.can_transition_to(Draft));
        assert!(!Executing.can_transition_to(Draft));
    }

    #[test]
    fn risk_level_cutoffs() {
        assert_eq!(RiskLevel::from_average_severity(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_average_severity(0.2), RiskLevel::Low);
        assert_eq!(RiskLevel::from_average_severity(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_average_severity(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_average_severity(0.71), RiskLevel::Critical);
    }

    #[test]
    fn action_kind_serializes_with_type_tag() {
        let kind = ActionKind::RouteTraffic { weight: 0.1 };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "route-traffic");
        assert_eq!(kind.action_type(), ActionType::RouteTraffic);
        assert_eq!(ActionType::parse("update-dns"), Some(ActionType::UpdateDns));
    }

    #[test]
    fn health_report_averages_only_reporting_instances() {
        let health = HealthStatus::healthy(1, 5);
        let report = HealthReport {
            instances: vec![
                InstanceHealth {
                    instance_id: "a".into(),
                    health: health.clone(),
                    metrics: Some(InstanceMetrics {
                        cpu_percent: 80.0,
                        requests_per_second: 10.0,
                        ..Default::default()
                    }),
                    receives_traffic: true,
                },
                InstanceHealth {
                    instance_id: "b".into(),
                    health,
                    metrics: None,
                    receives_traffic: true,
                },
            ],
            total_instances: 2,
            healthy_instances: 2,
            unhealthy_instances: 0,
            unhealthy_with_traffic: 0,
            system_health: SystemHealth::Healthy,
            checked_at: 1,
        };
        assert_eq!(report.average_cpu(), 80.0);
        assert_eq!(report.total_rps(), 10.0);
    }
}
