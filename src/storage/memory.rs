//! In-memory storage backend.
//!
//! Records live in a map shared by every accessor cloned through
//! [`MemoryStorage::with_holder`], which lets tests model several processes
//! racing on one store. The map mutex is the atomic unit, and the injected
//! [`Clock`] is the authoritative "now".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::clock::add_duration;
use crate::domain::{Clock, HolderIdentity, LockConfiguration, LockRecord};
use crate::error::StorageResult;
use crate::storage::traits::{AcquireStrategy, StorageAccessor};

/// In-memory storage implementation.
#[derive(Clone)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<String, LockRecord>>>,
    holder: HolderIdentity,
    clock: Arc<dyn Clock>,
    strategy: AcquireStrategy,
}

impl MemoryStorage {
    /// Create an empty store using insert-then-update acquisition.
    pub fn new(holder: HolderIdentity, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            holder,
            clock,
            strategy: AcquireStrategy::InsertThenUpdate,
        }
    }

    /// Use a different acquisition strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: AcquireStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Accessor for another holder sharing the same records.
    #[must_use]
    pub fn with_holder(&self, holder: HolderIdentity) -> Self {
        Self {
            records: Arc::clone(&self.records),
            holder,
            clock: Arc::clone(&self.clock),
            strategy: self.strategy,
        }
    }

    /// Drop a record, simulating an operator cleaning the table.
    pub fn remove_record(&self, name: &str) -> bool {
        self.records.lock().remove(name).is_some()
    }

    fn new_record(&self, config: &LockConfiguration) -> LockRecord {
        let now = self.clock.now();
        LockRecord {
            name: config.name().to_string(),
            lock_until: add_duration(now, config.lock_at_most_for()),
            locked_at: now,
            locked_by: self.holder.as_str().to_string(),
        }
    }
}

#[async_trait]
impl StorageAccessor for MemoryStorage {
    async fn insert_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let now = self.clock.now();
        let mut records = self.records.lock();

        match records.get(config.name()) {
            None => {}
            Some(existing) if self.strategy.insert_reclaims_expired() && !existing.is_held_at(now) => {}
            Some(_) => return Ok(false),
        }

        records.insert(config.name().to_string(), self.new_record(config));
        Ok(true)
    }

    async fn update_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let now = self.clock.now();
        let mut records = self.records.lock();

        match records.get_mut(config.name()) {
            Some(existing) if !existing.is_held_at(now) => {
                *existing = self.new_record(config);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, config: &LockConfiguration) -> StorageResult<()> {
        let now = self.clock.now();
        let mut records = self.records.lock();

        if let Some(existing) = records.get_mut(config.name())
            && existing.locked_by == self.holder.as_str()
        {
            let at_least_until = add_duration(existing.locked_at, config.lock_at_least_for());
            existing.lock_until = now.max(at_least_until);
        }
        Ok(())
    }

    async fn extend(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let now = self.clock.now();
        let mut records = self.records.lock();

        match records.get_mut(config.name()) {
            Some(existing)
                if existing.locked_by == self.holder.as_str() && existing.is_held_at(now) =>
            {
                existing.lock_until = add_duration(now, config.lock_at_most_for());
                existing.locked_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_record(&self, name: &str) -> StorageResult<Option<LockRecord>> {
        Ok(self.records.lock().get(name).cloned())
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    fn strategy(&self) -> AcquireStrategy {
        self.strategy
    }

    fn holder(&self) -> &HolderIdentity {
        &self.holder
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::domain::ManualClock;

    fn create_test_storage() -> (MemoryStorage, ManualClock) {
        let clock = ManualClock::default();
        let storage = MemoryStorage::new(
            HolderIdentity::new("node-a").unwrap(),
            Arc::new(clock.clone()),
        );
        (storage, clock)
    }

    fn config(at_most: u64, at_least: u64) -> LockConfiguration {
        LockConfiguration::new(
            "job",
            Duration::from_secs(at_most),
            Duration::from_secs(at_least),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_sets_all_fields() {
        let (storage, clock) = create_test_storage();
        let t0 = clock.now();

        assert!(storage.insert_record(&config(10, 0)).await.unwrap());

        let record = storage.find_record("job").await.unwrap().unwrap();
        assert_eq!(record.lock_until, t0 + TimeDelta::seconds(10));
        assert_eq!(record.locked_at, t0);
        assert_eq!(record.locked_by, "node-a");
    }

    #[tokio::test]
    async fn test_insert_rejects_existing_record_even_if_expired() {
        let (storage, clock) = create_test_storage();
        assert!(storage.insert_record(&config(10, 0)).await.unwrap());

        clock.advance(Duration::from_secs(11));
        assert!(!storage.insert_record(&config(10, 0)).await.unwrap());
        assert!(storage.update_record(&config(10, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_strategy_reclaims_expired_on_insert() {
        let (storage, clock) = create_test_storage();
        let storage = storage.with_strategy(AcquireStrategy::AtomicUpsert);
        let other = storage.with_holder(HolderIdentity::new("node-b").unwrap());

        assert!(storage.insert_record(&config(10, 0)).await.unwrap());
        assert!(!other.insert_record(&config(10, 0)).await.unwrap());

        clock.advance(Duration::from_secs(10));
        assert!(other.insert_record(&config(10, 0)).await.unwrap());
        let record = other.find_record("job").await.unwrap().unwrap();
        assert_eq!(record.locked_by, "node-b");
    }

    #[tokio::test]
    async fn test_update_requires_expired_record() {
        let (storage, clock) = create_test_storage();
        assert!(!storage.update_record(&config(10, 0)).await.unwrap());

        assert!(storage.insert_record(&config(10, 0)).await.unwrap());
        clock.advance(Duration::from_secs(9));
        assert!(!storage.update_record(&config(10, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_honors_lock_at_least_for() {
        let (storage, clock) = create_test_storage();
        let t0 = clock.now();
        assert!(storage.insert_record(&config(600, 60)).await.unwrap());

        clock.advance(Duration::from_secs(2));
        storage.unlock(&config(600, 60)).await.unwrap();
        let record = storage.find_record("job").await.unwrap().unwrap();
        assert_eq!(record.lock_until, t0 + TimeDelta::seconds(60));

        clock.advance(Duration::from_secs(100));
        storage.unlock(&config(600, 60)).await.unwrap();
        let record = storage.find_record("job").await.unwrap().unwrap();
        assert_eq!(record.lock_until, clock.now());
    }

    #[tokio::test]
    async fn test_unlock_by_other_holder_is_ignored() {
        let (storage, clock) = create_test_storage();
        let t0 = clock.now();
        let other = storage.with_holder(HolderIdentity::new("node-b").unwrap());
        assert!(storage.insert_record(&config(600, 0)).await.unwrap());

        other.unlock(&config(600, 0)).await.unwrap();
        let record = storage.find_record("job").await.unwrap().unwrap();
        assert_eq!(record.lock_until, t0 + TimeDelta::seconds(600));
    }

    #[tokio::test]
    async fn test_extend_only_by_live_owner() {
        let (storage, clock) = create_test_storage();
        let other = storage.with_holder(HolderIdentity::new("node-b").unwrap());
        assert!(storage.insert_record(&config(10, 0)).await.unwrap());

        clock.advance(Duration::from_secs(5));
        assert!(!other.extend(&config(10, 0)).await.unwrap());
        assert!(storage.extend(&config(10, 0)).await.unwrap());
        let record = storage.find_record("job").await.unwrap().unwrap();
        assert_eq!(record.lock_until, clock.now() + TimeDelta::seconds(10));
        assert_eq!(record.locked_at, clock.now());

        clock.advance(Duration::from_secs(10));
        assert!(!storage.extend(&config(10, 0)).await.unwrap());
    }
}
