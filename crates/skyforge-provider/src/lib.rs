//! skyforge-provider: the boundary between the orchestrator and clouds.
//!
//! Every cloud provider is reached through the [`ProviderAdapter`] trait:
//! availability, target listing, pricing, provisioning, deployment, health,
//! metrics, termination, resize, and environment updates. Adapters are
//! collected in an [`AdapterSet`] built once at startup.
//!
//! [`StubAdapter`] implements the trait in-process for AWS, Fly, Railway,
//! Render, and Cloudflare Workers from static [`ProviderProfile`]s, with
//! injectable [`Faults`].

pub mod adapter;
pub mod error;
pub mod stub;

pub use adapter::{AdapterSet, ProviderAdapter};
pub use error::{ProviderError, ProviderResult};
pub use stub::{Faults, ProviderProfile, StubAdapter};
