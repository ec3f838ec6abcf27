//! Per-instance mutation locks.
//!
//! Every mutating operation on an instance (deployment actions, health
//! sweeps, termination) holds that instance's lock, so operations on one
//! instance are serialized while different instances proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created lock per instance id.
#[derive(Clone, Default)]
pub struct InstanceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `instance_id`, waiting if it is held.
    pub async fn lock(&self, instance_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(instance_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Drop the lock slot of a terminated instance.
    pub async fn forget(&self, instance_id: &str) {
        self.locks.lock().await.remove(instance_id);
    }

    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_instance_is_serialized() {
        let locks = InstanceLocks::new();
        let guard = locks.lock("i-1").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("i-1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_instances_do_not_block() {
        let locks = InstanceLocks::new();
        let _a = locks.lock("i-1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("i-2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked().await, 2);

        locks.forget("i-2").await;
        assert_eq!(locks.tracked().await, 1);
    }
}
