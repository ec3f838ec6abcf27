//! skyforge-state: the orchestrator's shared mutable state.
//!
//! # Components
//!
//! - **`registry`**: `InstanceRegistry` and `PlanRegistry`, in-memory maps
//!   keyed by generated ids, with the plan state machine enforced on write
//! - **`locks`**: `InstanceLocks`, one async mutex per instance
//! - **`events`**: `EventBus`, a typed broadcast channel for lifecycle events

pub mod error;
pub mod events;
pub mod locks;
pub mod registry;

pub use error::{StateError, StateResult};
pub use events::{EventBus, SkyforgeEvent};
pub use locks::InstanceLocks;
pub use registry::{InstanceRegistry, PlanRegistry, generate_id};
