//! skyforge-autoscale: health-report-driven scaling.
//!
//! # Scaling Algorithm
//!
//! ```text
//! n        = live instances in the report
//! cpu      = average cpu_percent over instances with metrics
//! rps/inst = total rps / n
//!
//! if n < min_instances:
//!     ScaleUp(min_instances)
//!
//! if cpu > target_cpu * 100 * scale_up_threshold or rps/inst > target_rps:
//!     ScaleUp(min(n + 1, max_instances))     // maintain at max
//!     needs approval if spend + next instance > budget_limit
//!
//! if cpu < target_cpu * 100 * scale_down_threshold
//!    and rps/inst < target_rps * scale_down_rps_ratio:
//!     ScaleDown(n - 1)                       // maintain at min
//!
//! otherwise Maintain
//! ```
//!
//! A cooldown window after each successful scaling action prevents
//! oscillation.

pub mod scaler;

pub use scaler::{AutoScaler, SCALE_UP_MIN_TIER, ScalingOutcome, SpendEstimate};
