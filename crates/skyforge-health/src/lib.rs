//! skyforge-health: health sweeps over the live fleet.
//!
//! ```text
//! check_all_health()
//!   ├── per live instance (concurrent, under its lock)
//!   │     ├── health_check + get_metrics via the adapter
//!   │     ├── tracker: consecutive failures ≥ threshold → failed, traffic 0
//!   │     ├── running ↔ degraded, accrued cost, last check time
//!   │     └── InstanceHealthChanged on flips
//!   └── HealthReport: counts, unhealthy-with-traffic, system health
//! ```

pub mod checker;
pub mod monitor;

pub use checker::{HealthTracker, Probe, ProbeResult, TrackedHealth, probe_instance};
pub use monitor::HealthMonitor;
