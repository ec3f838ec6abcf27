//! skyforge-core: domain types and `skyforge.toml` configuration.

pub mod config;
pub mod types;

pub use config::{DeploymentDefaults, MonitorSettings, SkyforgeConfig};
pub use types::*;
