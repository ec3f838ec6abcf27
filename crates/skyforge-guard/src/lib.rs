//! skyforge-guard: safety invariants consulted before state changes.
//!
//! Invariants are evaluated by callers at decision points (planning,
//! scaling, termination), never on a background timer. `check_all` returns
//! the failing checks so the caller decides whether to block, warn, or
//! demand approval.
//!
//! # Baseline invariants
//!
//! | id | passes when |
//! |---|---|
//! | `spending-within-budget` | `current_spend <= budget_limit` |
//! | `minimum-healthy-instances` | `healthy_count >= min_healthy` |
//! | `no-unhealthy-traffic` | `unhealthy_with_traffic == 0` |

pub mod invariants;

pub use invariants::{
    FailingCheck, Invariant, InvariantCheck, InvariantContext, InvariantRegistry, Severity,
    MIN_HEALTHY, NO_UNHEALTHY_TRAFFIC, SPENDING_WITHIN_BUDGET,
};
