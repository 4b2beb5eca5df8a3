use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Idle lock slots are dropped once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-key async mutual exclusion with a bounded wait.
#[derive(Debug)]
pub struct KeyedLocks {
    slots: DashMap<Uuid, Arc<Mutex<()>>>,
    timeout: Duration,
}

/// Holds every lock taken by one `lock_many` or `lock_all` call until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    keys: Vec<Uuid>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn keys(&self) -> &[Uuid] {
        &self.keys
    }
}

impl KeyedLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn slot(&self, key: Uuid) -> Arc<Mutex<()>> {
        if self.slots.len() > PRUNE_THRESHOLD {
            self.prune();
        }
        self.slots
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Waits up to the configured timeout for `key`.
    pub async fn lock(&self, key: Uuid) -> Result<OwnedMutexGuard<()>, ServiceError> {
        let slot = self.slot(key);
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                counter!("repairdesk_locks.timeouts", 1);
                warn!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "Lock wait timed out");
                Err(ServiceError::ConcurrentModification(key))
            }
        }
    }

    /// Locks every key in ascending order. All callers take part locks in
    /// this order, so overlapping key sets cannot deadlock.
    pub async fn lock_many(
        &self,
        keys: impl IntoIterator<Item = Uuid>,
    ) -> Result<KeyGuard, ServiceError> {
        let mut keys: Vec<Uuid> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            // Locks taken so far are released if this one times out
            guards.push(self.lock(*key).await?);
        }

        debug!(count = keys.len(), "Acquired keyed locks");
        Ok(KeyGuard {
            keys,
            _guards: guards,
        })
    }

    /// Locks `primary` first, then `others` as [`KeyedLocks::lock_many`] does.
    pub async fn lock_all(
        &self,
        primary: Uuid,
        others: impl IntoIterator<Item = Uuid>,
    ) -> Result<KeyGuard, ServiceError> {
        let first = self.lock(primary).await?;
        let rest = self
            .lock_many(others.into_iter().filter(|key| *key != primary))
            .await?;

        let mut keys = Vec::with_capacity(rest.keys.len() + 1);
        keys.push(primary);
        keys.extend(rest.keys);
        let mut guards = Vec::with_capacity(keys.len());
        guards.push(first);
        guards.extend(rest._guards);
        Ok(KeyGuard {
            keys,
            _guards: guards,
        })
    }

    /// Drops slots nobody holds or waits on.
    pub fn prune(&self) {
        self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_holder_times_out_with_concurrent_modification() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        let key = Uuid::new_v4();

        let _held = locks.lock(key).await.unwrap();
        let err = locks.lock(key).await.unwrap_err();
        assert!(matches!(err, ServiceError::ConcurrentModification(id) if id == key));
    }

    #[tokio::test]
    async fn disjoint_keys_do_not_block() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        let _a = locks.lock(Uuid::new_v4()).await.unwrap();
        let _b = locks.lock(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn lock_all_orders_and_dedups_keys() {
        let locks = KeyedLocks::new(Duration::from_millis(50));
        let primary = Uuid::new_v4();
        let mut parts = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let with_dupes = vec![parts[2], parts[0], parts[1], parts[0], primary];

        let guard = locks.lock_all(primary, with_dupes).await.unwrap();
        parts.sort();
        assert_eq!(guard.keys()[0], primary);
        assert_eq!(&guard.keys()[1..], parts.as_slice());
    }

    #[tokio::test]
    async fn failed_lock_all_releases_what_it_took() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        let primary = Uuid::new_v4();
        let busy = Uuid::new_v4();

        let held = locks.lock(busy).await.unwrap();
        assert!(locks.lock_all(primary, [busy]).await.is_err());
        drop(held);

        // primary was released when lock_all failed
        let _primary = locks.lock(primary).await.unwrap();
    }

    #[tokio::test]
    async fn prune_keeps_held_slots() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        let held_key = Uuid::new_v4();
        let _held = locks.lock(held_key).await.unwrap();
        drop(locks.lock(Uuid::new_v4()).await.unwrap());

        locks.prune();
        assert_eq!(locks.len(), 1);
    }
}
