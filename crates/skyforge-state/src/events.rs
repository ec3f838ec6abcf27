//! Typed lifecycle events.
//!
//! Subscribers (dashboards, audit logs) are wired at construction time by
//! calling [`EventBus::subscribe`]. Emitting never blocks and never fails;
//! events sent while nobody listens are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use skyforge_core::{ActionType, InstanceId, PlanId, PlanStatus, ScalingAction};

/// Lifecycle notification emitted by the orchestrator components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SkyforgeEvent {
    PlanCreated {
        plan_id: PlanId,
        requires_approval: bool,
    },
    PlanStatusChanged {
        plan_id: PlanId,
        from: PlanStatus,
        to: PlanStatus,
    },
    ActionFinished {
        plan_id: Option<PlanId>,
        action: ActionType,
        success: bool,
        attempts: u32,
    },
    InstanceRegistered {
        instance_id: InstanceId,
    },
    InstanceTerminated {
        instance_id: InstanceId,
    },
    InstanceHealthChanged {
        instance_id: InstanceId,
        healthy: bool,
    },
    ScalingExecuted {
        action: ScalingAction,
        target_instances: u32,
        success: bool,
    },
    BudgetWarning {
        projected_monthly: f64,
        limit: f64,
    },
}

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel for [`SkyforgeEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SkyforgeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: SkyforgeEvent) {
        trace!(?event, "event emitted");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SkyforgeEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(SkyforgeEvent::InstanceRegistered {
            instance_id: "i-1".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SkyforgeEvent::InstanceRegistered {
                instance_id: "i-1".to_string()
            }
        );
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(SkyforgeEvent::BudgetWarning {
            projected_monthly: 600.0,
            limit: 500.0,
        });
    }
}
