//! Invariant registry.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const SPENDING_WITHIN_BUDGET: &str = "spending-within-budget";
pub const MIN_HEALTHY: &str = "minimum-healthy-instances";
pub const NO_UNHEALTHY_TRAFFIC: &str = "no-unhealthy-traffic";

/// Ambient numbers the orchestrator computes before consulting invariants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvariantContext {
    /// Monthly spend to evaluate (current or projected).
    pub current_spend: f64,
    pub budget_limit: f64,
    pub healthy_count: u32,
    pub min_healthy: u32,
    pub unhealthy_with_traffic: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// Outcome of a single checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantCheck {
    pub passed: bool,
    pub message: Option<String>,
}

impl InvariantCheck {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// A check that did not pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailingCheck {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub message: String,
}

type Checker = Box<dyn Fn(&InvariantContext) -> InvariantCheck + Send + Sync>;

/// A named safety predicate.
pub struct Invariant {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    checker: Checker,
}

impl Invariant {
    pub fn new<F>(id: &str, name: &str, severity: Severity, checker: F) -> Self
    where
        F: Fn(&InvariantContext) -> InvariantCheck + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            severity,
            checker: Box::new(checker),
        }
    }

    pub fn check(&self, ctx: &InvariantContext) -> InvariantCheck {
        (self.checker)(ctx)
    }
}

impl fmt::Debug for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invariant")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

/// Ordered set of invariants.
#[derive(Debug, Default)]
pub struct InvariantRegistry {
    invariants: Vec<Invariant>,
}

impl InvariantRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the spending, survival, and traffic-safety checks.
    pub fn with_baseline() -> Self {
        let mut registry = Self::new();

        registry.register(Invariant::new(
            SPENDING_WITHIN_BUDGET,
            "Spending within budget",
            Severity::Critical,
            |ctx| {
                if ctx.current_spend <= ctx.budget_limit {
                    InvariantCheck::pass()
                } else {
                    InvariantCheck::fail(format!(
                        "monthly spend ${:.2} exceeds budget ${:.2}",
                        ctx.current_spend, ctx.budget_limit
                    ))
                }
            },
        ));

        registry.register(Invariant::new(
            MIN_HEALTHY,
            "Minimum healthy instances",
            Severity::Critical,
            |ctx| {
                if ctx.healthy_count >= ctx.min_healthy {
                    InvariantCheck::pass()
                } else {
                    InvariantCheck::fail(format!(
                        "{} healthy instance(s), at least {} required",
                        ctx.healthy_count, ctx.min_healthy
                    ))
                }
            },
        ));

        registry.register(Invariant::new(
            NO_UNHEALTHY_TRAFFIC,
            "No traffic to unhealthy instances",
            Severity::Critical,
            |ctx| {
                if ctx.unhealthy_with_traffic == 0 {
                    InvariantCheck::pass()
                } else {
                    InvariantCheck::fail(format!(
                        "{} unhealthy instance(s) still receive traffic",
                        ctx.unhealthy_with_traffic
                    ))
                }
            },
        ));

        registry
    }

    /// Add an invariant, replacing any existing one with the same id.
    pub fn register(&mut self, invariant: Invariant) {
        if let Some(existing) = self.invariants.iter_mut().find(|i| i.id == invariant.id) {
            debug!(id = %invariant.id, "invariant replaced");
            *existing = invariant;
        } else {
            debug!(id = %invariant.id, "invariant registered");
            self.invariants.push(invariant);
        }
    }

    /// Evaluate one invariant by id.
    pub fn check(&self, id: &str, ctx: &InvariantContext) -> Option<InvariantCheck> {
        self.invariants
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.check(ctx))
    }

    /// Evaluate every invariant and return those that failed.
    pub fn check_all(&self, ctx: &InvariantContext) -> Vec<FailingCheck> {
        let failing: Vec<FailingCheck> = self
            .invariants
            .iter()
            .filter_map(|inv| {
                let result = inv.check(ctx);
                if result.passed {
                    return None;
                }
                Some(FailingCheck {
                    id: inv.id.clone(),
                    name: inv.name.clone(),
                    severity: inv.severity,
                    message: result
                        .message
                        .unwrap_or_else(|| format!("{} failed", inv.name)),
                })
            })
            .collect();

        for f in &failing {
            warn!(id = %f.id, severity = %f.severity, message = %f.message, "invariant failed");
        }
        failing
    }

    /// Evaluate only the listed invariants.
    pub fn check_only(&self, ids: &[&str], ctx: &InvariantContext) -> Vec<FailingCheck> {
        self.check_all(ctx)
            .into_iter()
            .filter(|f| ids.contains(&f.id.as_str()))
            .collect()
    }

    pub fn has_critical(failing: &[FailingCheck]) -> bool {
        failing.iter().any(|f| f.severity == Severity::Critical)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.invariants.iter().map(|i| i.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_context() -> InvariantContext {
        InvariantContext {
            current_spend: 100.0,
            budget_limit: 500.0,
            healthy_count: 3,
            min_healthy: 1,
            unhealthy_with_traffic: 0,
        }
    }

    #[test]
    fn baseline_passes_on_healthy_system() {
        let registry = InvariantRegistry::with_baseline();
        assert_eq!(registry.len(), 3);
        assert!(registry.check_all(&healthy_context()).is_empty());
    }

    #[test]
    fn overspend_fails_spending_check() {
        let registry = InvariantRegistry::with_baseline();
        let ctx = InvariantContext {
            current_spend: 650.0,
            ..healthy_context()
        };
        let failing = registry.check_all(&ctx);
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].id, SPENDING_WITHIN_BUDGET);
        assert!(failing[0].message.contains("650.00"));
        assert!(InvariantRegistry::has_critical(&failing));
    }

    #[test]
    fn spend_equal_to_budget_passes() {
        let registry = InvariantRegistry::with_baseline();
        let ctx = InvariantContext {
            current_spend: 500.0,
            ..healthy_context()
        };
        assert!(registry.check(SPENDING_WITHIN_BUDGET, &ctx).unwrap().passed);
    }

    #[test]
    fn survival_and_traffic_checks() {
        let registry = InvariantRegistry::with_baseline();
        let ctx = InvariantContext {
            healthy_count: 0,
            min_healthy: 2,
            unhealthy_with_traffic: 1,
            ..healthy_context()
        };
        let ids: Vec<String> = registry.check_all(&ctx).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![MIN_HEALTHY.to_string(), NO_UNHEALTHY_TRAFFIC.to_string()]);

        let only = registry.check_only(&[MIN_HEALTHY], &ctx);
        assert_eq!(only.len(), 1);
    }

    #[test]
    fn custom_invariant_replaces_by_id() {
        let mut registry = InvariantRegistry::with_baseline();
        registry.register(Invariant::new(
            SPENDING_WITHIN_BUDGET,
            "Lenient spending",
            Severity::Warning,
            |_| InvariantCheck::fail("always warns"),
        ));
        assert_eq!(registry.len(), 3);

        let failing = registry.check_all(&healthy_context());
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].severity, Severity::Warning);
        assert!(!InvariantRegistry::has_critical(&failing));
    }

    #[test]
    fn unknown_id_returns_none() {
        let registry = InvariantRegistry::new();
        assert!(registry.check("nope", &healthy_context()).is_none());
        assert!(registry.is_empty());
    }
}
