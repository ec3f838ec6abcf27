//! skyforge-executor: runs plans against providers.
//!
//! # Components
//!
//! - **`executor`**: `PlanExecutor`, plan execution, single actions,
//!   rollback, termination under the survival invariant, env updates and
//!   resizes
//! - **`retry`**: bounded exponential backoff with a stop signal
//!
//! ```text
//! execute_plan(id, approval?)
//!   ├── reject: unknown, not executable, unapproved, instance limit
//!   ├── pending-approval → approved → executing
//!   ├── actions in order, instance threaded through
//!   ├── failure → failed → rollback (spawned) → rolled-back
//!   └── success → completed, instance registered
//! ```

pub mod error;
pub mod executor;
pub mod retry;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{ActionResult, DeploymentResult, PlanExecutor};
