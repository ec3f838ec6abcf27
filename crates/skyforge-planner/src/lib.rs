//! skyforge-planner: costed, risk-assessed deployment plans.
//!
//! ```text
//! create_plan(request)
//!   ├── target: supplied (rejected if blocked) or cheapest eligible
//!   ├── cost:   adapter pricing, catalog estimate as fallback
//!   ├── approval gate: per-plan threshold, projected budget, policy actions
//!   ├── actions: build → provision → env → deploy → health-check → route(0.1)
//!   ├── rollback: route(0.0) → terminate
//!   └── store as draft or pending-approval
//! ```

pub mod actions;
pub mod error;
pub mod planner;
pub mod risk;

pub use actions::{INITIAL_TRAFFIC_WEIGHT, check_traffic_safety, deployment_actions, rollback_plan};
pub use error::{PlannerError, PlannerResult};
pub use planner::{DeploymentPlanner, PlanRequest};
pub use risk::{RiskInputs, assess_risk};
