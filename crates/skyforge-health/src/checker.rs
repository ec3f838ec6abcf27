//! Health probe logic.
//!
//! Probes an instance through its provider adapter and tracks
//! consecutive results so a flapping instance is only written off after
//! a configurable number of failures in a row.

use tracing::{debug, warn};

use skyforge_core::{HealthStatus, Instance, InstanceMetrics, epoch_secs};
use skyforge_provider::ProviderAdapter;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The provider reported the instance healthy.
    Healthy,
    /// The provider reported the instance unhealthy.
    Unhealthy,
    /// The probe could not be executed (adapter error).
    Failed,
}

/// Verdict of a [`HealthTracker`] after the latest probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Tracks consecutive probe results for a single instance.
#[derive(Debug)]
pub struct HealthTracker {
    status: TrackedHealth,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Failures in a row before the instance is written off.
    unhealthy_threshold: u32,
    /// Successes needed to recover.
    healthy_threshold: u32,
}

impl HealthTracker {
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self::with_thresholds(unhealthy_threshold, 1)
    }

    pub fn with_thresholds(unhealthy_threshold: u32, healthy_threshold: u32) -> Self {
        Self {
            status: TrackedHealth::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
        }
    }

    /// Record a probe result and return the new verdict.
    pub fn record(&mut self, result: ProbeResult) -> TrackedHealth {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.healthy_threshold {
                    if self.status == TrackedHealth::Unhealthy {
                        debug!(
                            successes = self.consecutive_successes,
                            "instance recovered to healthy"
                        );
                    }
                    self.status = TrackedHealth::Healthy;
                }
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.status != TrackedHealth::Unhealthy {
                        warn!(
                            failures = self.consecutive_failures,
                            threshold = self.unhealthy_threshold,
                            "instance crossed unhealthy threshold"
                        );
                    }
                    self.status = TrackedHealth::Unhealthy;
                }
            }
        }
        self.status
    }

    pub fn status(&self) -> TrackedHealth {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the instance should be taken out of service.
    pub fn needs_replacement(&self) -> bool {
        self.status == TrackedHealth::Unhealthy
    }
}

/// Health and metrics gathered from one probe.
#[derive(Debug, Clone)]
pub struct Probe {
    pub result: ProbeResult,
    pub health: HealthStatus,
    pub metrics: Option<InstanceMetrics>,
}

/// Probe an instance through its adapter.
///
/// Adapter errors never escape: a failed health call becomes an unhealthy
/// status carrying the error message, a failed metrics call yields `None`.
pub async fn probe_instance(adapter: &dyn ProviderAdapter, instance: &Instance) -> Probe {
    let (result, health) = match adapter.health_check(instance).await {
        Ok(health) if health.healthy => (ProbeResult::Healthy, health),
        Ok(health) => (ProbeResult::Unhealthy, health),
        Err(e) => {
            debug!(instance = %instance.id, error = %e, "health probe failed");
            (
                ProbeResult::Failed,
                HealthStatus::unhealthy(epoch_secs(), e.to_string()),
            )
        }
    };

    let metrics = match adapter.get_metrics(instance).await {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            debug!(instance = %instance.id, error = %e, "metrics unavailable");
            None
        }
    };

    Probe {
        result,
        health,
        metrics,
    }
}
