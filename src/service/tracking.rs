//! Lock provider wrapper that keeps track of the locks held by this process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::LockConfiguration;
use crate::error::LockResult;
use crate::service::provider::{LockProvider, SimpleLock};

type ActiveLocks = Arc<DashMap<u64, LockConfiguration>>;

/// Wraps a provider and records every lock it hands out until the lock is
/// released, lost, or dropped.
pub struct TrackingLockProvider {
    inner: Arc<dyn LockProvider>,
    active: ActiveLocks,
    next_id: AtomicU64,
}

impl TrackingLockProvider {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn LockProvider>) -> Self {
        Self {
            inner,
            active: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Configurations of the locks currently held through this provider.
    #[must_use]
    pub fn active_locks(&self) -> Vec<LockConfiguration> {
        let mut locks: Vec<_> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        locks.sort_by(|a, b| a.name().cmp(b.name()));
        locks
    }

    /// Configuration of the held lock `name`, if any.
    #[must_use]
    pub fn active_lock(&self, name: &str) -> Option<LockConfiguration> {
        self.active
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl LockProvider for TrackingLockProvider {
    async fn try_lock(
        &self,
        config: &LockConfiguration,
    ) -> LockResult<Option<Box<dyn SimpleLock>>> {
        let Some(lock) = self.inner.try_lock(config).await? else {
            return Ok(None);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.insert(id, lock.configuration().clone());

        Ok(Some(Box::new(TrackedLock {
            id,
            lock,
            active: Arc::clone(&self.active),
        })))
    }
}

struct TrackedLock {
    id: u64,
    lock: Box<dyn SimpleLock>,
    active: ActiveLocks,
}

#[async_trait]
impl SimpleLock for TrackedLock {
    fn name(&self) -> &str {
        self.lock.name()
    }

    fn configuration(&self) -> &LockConfiguration {
        self.lock.configuration()
    }

    async fn unlock(&mut self) -> LockResult<()> {
        self.lock.unlock().await?;
        self.active.remove(&self.id);
        Ok(())
    }

    async fn extend(
        &mut self,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> LockResult<bool> {
        let extended = self.lock.extend(lock_at_most_for, lock_at_least_for).await?;
        if extended {
            self.active
                .insert(self.id, self.lock.configuration().clone());
        } else {
            self.active.remove(&self.id);
        }
        Ok(extended)
    }
}

impl Drop for TrackedLock {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}
