//! skyforge-catalog: where could something run, and what would it cost?
//!
//! The [`TargetCatalog`] fans out to every registered adapter, drops
//! targets the safety policy forbids, applies the caller's filter, and
//! returns the remainder sorted by monthly cost.
//!
//! ```text
//! discover_targets(filter)
//!   ├── per adapter (concurrent): check_availability → list_targets
//!   ├── drop: unavailable, blocked provider/region, cost > max_cost_per_instance
//!   ├── apply filter: providers, regions, max_cost, tier
//!   └── sort ascending by estimated_monthly_cost
//! ```

pub mod catalog;

pub use catalog::{TargetCatalog, TargetFilter, TargetRequirements};
