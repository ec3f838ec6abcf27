//! Risk scoring for deployment plans.

use skyforge_core::{RiskAssessment, RiskFactor, RiskLevel};

/// Numbers the planner gathers before scoring a plan.
#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    pub monthly_cost: f64,
    pub budget_limit: f64,
    /// Current live spend plus the new plan's monthly cost.
    pub projected_spend: f64,
    pub live_instances: usize,
    /// An urgent plan skipped an approval it would otherwise need.
    pub bypassed_cost_gate: bool,
    pub latency_ms: Option<u32>,
}

const HIGH_LATENCY_MS: u32 = 200;

fn factor(name: &str, severity: f64, description: String) -> RiskFactor {
    RiskFactor {
        name: name.to_string(),
        severity,
        description,
    }
}

/// Score a plan. The level is derived from the average factor severity;
/// a plan with no factors is low risk.
pub fn assess_risk(inputs: &RiskInputs) -> RiskAssessment {
    let mut factors = Vec::new();
    let mut mitigations = Vec::new();

    let ratio = if inputs.budget_limit > 0.0 {
        inputs.monthly_cost / inputs.budget_limit
    } else {
        1.0
    };
    if ratio > 0.5 {
        factors.push(factor(
            "cost-ratio",
            ratio,
            format!(
                "instance costs {:.0}% of the monthly budget",
                ratio * 100.0
            ),
        ));
        mitigations.push("review cheaper tiers or providers before approving".to_string());
    }

    if inputs.live_instances == 0 {
        factors.push(factor(
            "no-redundancy",
            0.3,
            "no other live instance can absorb traffic if this one fails".to_string(),
        ));
        mitigations.push("keep traffic weight low until a second instance is healthy".to_string());
    }

    if inputs.budget_limit > 0.0 && inputs.projected_spend > inputs.budget_limit * 0.8 {
        factors.push(factor(
            "budget-headroom",
            0.6,
            format!(
                "projected spend ${:.2} leaves under 20% of the ${:.2} budget",
                inputs.projected_spend, inputs.budget_limit
            ),
        ));
        mitigations.push("schedule a scale-down once load subsides".to_string());
    }

    if inputs.bypassed_cost_gate {
        factors.push(factor(
            "approval-bypassed",
            0.4,
            "urgent plan skipped the spending approval gate".to_string(),
        ));
        mitigations.push("have an operator review the plan after execution".to_string());
    }

    if let Some(latency) = inputs.latency_ms.filter(|l| *l > HIGH_LATENCY_MS) {
        factors.push(factor(
            "high-latency",
            0.2,
            format!("target latency {latency}ms exceeds {HIGH_LATENCY_MS}ms"),
        ));
    }

    let level = if factors.is_empty() {
        RiskLevel::Low
    } else {
        let avg = factors.iter().map(|f| f.severity).sum::<f64>() / factors.len() as f64;
        RiskLevel::from_average_severity(avg)
    };

    mitigations.push("automatic rollback withdraws traffic and terminates on failure".to_string());

    RiskAssessment {
        level,
        factors,
        mitigations,
    }
}
