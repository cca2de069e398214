//! Storage based lock provider and its lock handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::domain::LockConfiguration;
use crate::error::{LockError, LockResult};
use crate::service::metrics::{record_attempt, record_extension, Outcome};
use crate::service::registry::LockRecordRegistry;
use crate::storage::DynStorageAccessor;

/// A held lock.
///
/// Returned only on successful acquisition. Unlock and extend act on the
/// record the handle was acquired for.
#[async_trait]
pub trait SimpleLock: Send + Sync {
    /// Name of the lock.
    fn name(&self) -> &str;

    /// Configuration the lock is currently held with.
    fn configuration(&self) -> &LockConfiguration;

    /// Release the lock, keeping it held until `lock_at_least_for` has
    /// passed since acquisition or the last extension.
    ///
    /// Calling it again is a no-op.
    async fn unlock(&mut self) -> LockResult<()>;

    /// Renew the lease for another `lock_at_most_for`.
    ///
    /// Returns `false` if ownership was lost; the handle must then no longer
    /// be treated as held.
    async fn extend(
        &mut self,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> LockResult<bool>;
}

/// Caller-facing entry point.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Try to acquire the lock described by `config`.
    ///
    /// Returns `None` when the lock is held elsewhere. A storage fault is an
    /// error and must be treated as "not acquired".
    async fn try_lock(&self, config: &LockConfiguration)
    -> LockResult<Option<Box<dyn SimpleLock>>>;
}

/// Lock provider running the acquisition protocol on a
/// [`StorageAccessor`](crate::storage::StorageAccessor).
pub struct StorageBasedLockProvider {
    accessor: Arc<DynStorageAccessor>,
    registry: LockRecordRegistry,
}

impl StorageBasedLockProvider {
    /// Create a provider on top of a storage accessor.
    #[must_use]
    pub fn new(accessor: Arc<DynStorageAccessor>) -> Self {
        Self {
            accessor,
            registry: LockRecordRegistry::new(),
        }
    }

    /// The underlying accessor.
    #[must_use]
    pub fn accessor(&self) -> &Arc<DynStorageAccessor> {
        &self.accessor
    }

    /// Forget which lock records are known to exist.
    ///
    /// Needed when records are deleted behind the provider's back, e.g. when
    /// the lock table is truncated.
    pub fn clear_cache(&self) {
        self.registry.clear();
    }

    async fn acquire(&self, config: &LockConfiguration) -> LockResult<bool> {
        if self.accessor.strategy().insert_reclaims_expired() {
            return Ok(self.accessor.insert_record(config).await?);
        }

        let name = config.name();
        let try_insert = !self.registry.contains(name);
        if try_insert {
            if self.accessor.insert_record(config).await? {
                self.registry.add(name);
                return Ok(true);
            }
            self.registry.add(name);
        }

        match self.accessor.update_record(config).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                // the record may not exist after all
                if try_insert {
                    self.registry.remove(name);
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl LockProvider for StorageBasedLockProvider {
    async fn try_lock(
        &self,
        config: &LockConfiguration,
    ) -> LockResult<Option<Box<dyn SimpleLock>>> {
        match self.acquire(config).await {
            Ok(true) => {
                record_attempt(config.name(), Outcome::Acquired);
                debug!(lock = config.name(), holder = %self.accessor.holder(), "Locked");
                Ok(Some(Box::new(StorageLock::new(
                    config.clone(),
                    Arc::clone(&self.accessor),
                ))))
            }
            Ok(false) => {
                record_attempt(config.name(), Outcome::Rejected);
                debug!(lock = config.name(), "Not locked, held elsewhere");
                Ok(None)
            }
            Err(e) => {
                record_attempt(config.name(), Outcome::Error);
                error!(lock = config.name(), error = %e, "Lock acquisition failed");
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Held,
    Released,
    Lost,
}

/// Lock handle issued by [`StorageBasedLockProvider`].
///
/// Dropping a handle that is still held releases it in the background on the
/// current tokio runtime.
pub struct StorageLock {
    config: LockConfiguration,
    accessor: Arc<DynStorageAccessor>,
    state: HandleState,
}

impl StorageLock {
    fn new(config: LockConfiguration, accessor: Arc<DynStorageAccessor>) -> Self {
        Self {
            config,
            accessor,
            state: HandleState::Held,
        }
    }

    /// Whether the handle still considers itself the owner.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state == HandleState::Held
    }
}

#[async_trait]
impl SimpleLock for StorageLock {
    fn name(&self) -> &str {
        self.config.name()
    }

    fn configuration(&self) -> &LockConfiguration {
        &self.config
    }

    async fn unlock(&mut self) -> LockResult<()> {
        if self.state != HandleState::Held {
            return Ok(());
        }

        self.accessor.unlock(&self.config).await?;
        self.state = HandleState::Released;
        debug!(lock = self.config.name(), "Unlocked");
        Ok(())
    }

    async fn extend(
        &mut self,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> LockResult<bool> {
        match self.state {
            HandleState::Held => {}
            HandleState::Released => {
                return Err(LockError::HandleReleased(self.config.name().to_string()));
            }
            HandleState::Lost => return Ok(false),
        }

        let extended = self
            .config
            .with_durations(lock_at_most_for, lock_at_least_for)?;

        match self.accessor.extend(&extended).await {
            Ok(true) => {
                record_extension(self.config.name(), Outcome::Acquired);
                debug!(lock = self.config.name(), until = ?lock_at_most_for, "Extended");
                self.config = extended;
                Ok(true)
            }
            Ok(false) => {
                record_extension(self.config.name(), Outcome::Rejected);
                warn!(lock = self.config.name(), "Lock can not be extended, ownership lost");
                self.state = HandleState::Lost;
                Ok(false)
            }
            Err(e) => {
                record_extension(self.config.name(), Outcome::Error);
                Err(e.into())
            }
        }
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if self.state != HandleState::Held {
            return;
        }

        warn!(lock = self.config.name(), "Lock dropped without unlock, releasing");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let config = self.config.clone();
        let accessor = Arc::clone(&self.accessor);
        runtime.spawn(async move {
            if let Err(e) = accessor.unlock(&config).await {
                error!(lock = config.name(), error = %e, "Background unlock failed");
            }
        });
    }
}
