//! skyforged: the skyforge daemon.
//!
//! [`Orchestrator`] assembles every subsystem behind a single facade:
//! - Instance and plan registries, locks, event bus
//! - Target catalog over the registered provider adapters
//! - Deployment planner and plan executor
//! - Health monitor
//! - Autoscaler
//!
//! The `skyforged` binary drives it from the command line.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorStatus, stub_adapters};
