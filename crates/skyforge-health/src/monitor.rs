//! Health monitor: sweeps every live instance and builds a [`HealthReport`].
//!
//! Each sweep probes all live instances concurrently, each under its
//! instance lock, and writes back health, metrics, status, and accrued
//! cost. Instances that fail `unhealthy_threshold` sweeps in a row are
//! marked failed, their traffic is withdrawn, and they are released at the
//! provider and dropped from the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use skyforge_core::*;
use skyforge_provider::{AdapterSet, ProviderError};
use skyforge_state::{EventBus, InstanceLocks, InstanceRegistry, SkyforgeEvent};

use crate::checker::{HealthTracker, Probe, ProbeResult, probe_instance};

/// Runs health sweeps over the instance registry.
pub struct HealthMonitor {
    adapters: AdapterSet,
    instances: InstanceRegistry,
    locks: InstanceLocks,
    events: EventBus,
    min_healthy: u32,
    unhealthy_threshold: u32,
    /// Consecutive-result trackers: instance_id → tracker.
    trackers: Arc<Mutex<HashMap<InstanceId, HealthTracker>>>,
}

impl HealthMonitor {
    pub fn new(
        adapters: AdapterSet,
        instances: InstanceRegistry,
        locks: InstanceLocks,
        events: EventBus,
        min_healthy: u32,
        unhealthy_threshold: u32,
    ) -> Self {
        Self {
            adapters,
            instances,
            locks,
            events,
            min_healthy,
            unhealthy_threshold,
            trackers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Probe every live instance and aggregate the results.
    pub async fn check_all_health(&self) -> HealthReport {
        let live: Vec<InstanceId> = self
            .instances
            .list()
            .await
            .into_iter()
            .filter(|i| i.status.is_live())
            .map(|i| i.id)
            .collect();

        let checked: Vec<InstanceHealth> = join_all(live.iter().map(|id| self.check_instance(id)))
            .await
            .into_iter()
            .flatten()
            .collect();

        self.prune_trackers(&live).await;
        self.release_failed().await;

        let total = checked.len() as u32;
        let healthy = checked.iter().filter(|c| c.health.healthy).count() as u32;
        let unhealthy_with_traffic = checked
            .iter()
            .filter(|c| !c.health.healthy && c.receives_traffic)
            .count() as u32;
        let system_health = if healthy >= self.min_healthy {
            SystemHealth::Healthy
        } else {
            SystemHealth::Degraded
        };

        debug!(
            total,
            healthy,
            unhealthy_with_traffic,
            system = ?system_health,
            "health sweep finished"
        );

        HealthReport {
            instances: checked,
            total_instances: total,
            healthy_instances: healthy,
            unhealthy_instances: total - healthy,
            unhealthy_with_traffic,
            system_health,
            checked_at: epoch_secs(),
        }
    }

    /// Probe one instance under its lock and write the result back.
    ///
    /// Returns `None` if the instance disappeared while waiting for the lock.
    async fn check_instance(&self, id: &str) -> Option<InstanceHealth> {
        let _guard = self.locks.lock(id).await;
        let instance = self.instances.get(id).await?;
        if !instance.status.is_live() {
            return None;
        }

        let probe = match self.adapters.for_target(&instance.target) {
            Some(adapter) => probe_instance(adapter.as_ref(), &instance).await,
            None => Probe {
                result: ProbeResult::Failed,
                health: HealthStatus::unhealthy(
                    epoch_secs(),
                    format!("no adapter registered for {}", instance.target.provider),
                ),
                metrics: None,
            },
        };

        let written_off = {
            let mut trackers = self.trackers.lock().await;
            let tracker = trackers
                .entry(instance.id.clone())
                .or_insert_with(|| HealthTracker::new(self.unhealthy_threshold));
            tracker.record(probe.result);
            tracker.needs_replacement()
        };

        let now = epoch_secs();
        let hourly = EstimatedCost::from_monthly(instance.target.estimated_monthly_cost).hourly;
        let health = probe.health.clone();
        let metrics = probe.metrics.clone();

        let updated = self
            .instances
            .update(id, |i| {
                let since = i.last_health_check.unwrap_or(i.created_at);
                i.accumulated_cost += hourly * now.saturating_sub(since) as f64 / 3600.0;
                i.health = health;
                if let Some(m) = metrics {
                    i.metrics = m;
                }
                i.last_health_check = Some(now);

                if written_off {
                    i.status = InstanceStatus::Failed;
                    i.traffic_weight = 0.0;
                } else if i.health.healthy && i.status == InstanceStatus::Degraded {
                    i.status = InstanceStatus::Running;
                } else if !i.health.healthy && i.status == InstanceStatus::Running {
                    i.status = InstanceStatus::Degraded;
                }
            })
            .await
            .ok()?;

        if written_off {
            warn!(
                instance = %id,
                threshold = self.unhealthy_threshold,
                "instance marked failed, traffic withdrawn"
            );
        }
        if instance.health.healthy != updated.health.healthy {
            info!(instance = %id, healthy = updated.health.healthy, "instance health changed");
            self.events.emit(SkyforgeEvent::InstanceHealthChanged {
                instance_id: id.to_string(),
                healthy: updated.health.healthy,
            });
        }

        Some(InstanceHealth {
            instance_id: updated.id.clone(),
            receives_traffic: updated.receives_traffic(),
            health: updated.health,
            metrics: probe.metrics,
        })
    }

    /// Terminate written-off instances at their provider and drop them from
    /// the registry. Instances that cannot be released are retried on the
    /// next sweep.
    async fn release_failed(&self) {
        let failed: Vec<Instance> = self
            .instances
            .list()
            .await
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Failed)
            .collect();

        for instance in failed {
            let released = {
                let _guard = self.locks.lock(&instance.id).await;
                let released = match self.adapters.for_target(&instance.target) {
                    Some(adapter) => match adapter.terminate(&instance).await {
                        Ok(()) | Err(ProviderError::InstanceNotFound(_)) => true,
                        Err(e) => {
                            warn!(
                                instance = %instance.id,
                                error = %e,
                                "failed instance not released, retrying next sweep"
                            );
                            false
                        }
                    },
                    None => {
                        warn!(
                            instance = %instance.id,
                            provider = %instance.target.provider,
                            "no adapter to release failed instance"
                        );
                        false
                    }
                };
                if released {
                    self.instances.remove(&instance.id).await;
                }
                released
            };
            if !released {
                continue;
            }

            self.locks.forget(&instance.id).await;
            self.events.emit(SkyforgeEvent::InstanceTerminated {
                instance_id: instance.id.clone(),
            });
            info!(instance = %instance.id, "failed instance released");
        }
    }

    /// Drop trackers of instances that are no longer live.
    async fn prune_trackers(&self, live: &[InstanceId]) {
        self.trackers
            .lock()
            .await
            .retain(|id, _| live.iter().any(|l| l == id));
    }

    /// Sweep every `interval` until `shutdown` turns true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "health monitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let report = self.check_all_health().await;
                    if report.system_health == SystemHealth::Degraded {
                        warn!(
                            healthy = report.healthy_instances,
                            min = self.min_healthy,
                            "system degraded"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    debug!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}
