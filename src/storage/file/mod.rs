//! File-based storage backend.
//!
//! Stores one JSON lock record per lock name and uses exclusive file locks
//! for the check-and-write. Suitable for development and for several
//! processes sharing one host; the local clock is the authority for "now".
//!
//! Directory structure:
//! ```text
//! data/
//! └── locks/
//!     └── {encoded name}.json
//! ```

mod record;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::FileStorageConfig;
use crate::domain::clock::add_duration;
use crate::domain::{Clock, HolderIdentity, LockConfiguration, LockRecord};
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{AcquireStrategy, StorageAccessor};

pub use record::RecordFile;

/// File-based storage implementation.
pub struct FileStorage {
    /// Base data directory.
    base_dir: PathBuf,
    /// Directory holding the record files.
    locks_dir: PathBuf,
    holder: HolderIdentity,
    clock: Arc<dyn Clock>,
}

impl FileStorage {
    /// Create a new file storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directories cannot be created.
    pub fn new(
        config: &FileStorageConfig,
        holder: HolderIdentity,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        let base_dir = config.data_dir.clone();
        let locks_dir = base_dir.join("locks");

        std::fs::create_dir_all(&locks_dir).map_err(|e| {
            StorageError::FileIO(format!("Failed to create directory {locks_dir:?}: {e}"))
        })?;

        Ok(Self {
            base_dir,
            locks_dir,
            holder,
            clock,
        })
    }

    /// Run one locked read-decide-write on the record file of `name`.
    ///
    /// Blocking file I/O runs on the blocking pool; "now" is read only once
    /// the exclusive lock is held.
    async fn transact<T, F>(&self, name: &str, decide: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Option<LockRecord>, chrono::DateTime<chrono::Utc>) -> (Option<LockRecord>, T)
            + Send
            + 'static,
    {
        let file = RecordFile::new(&self.locks_dir, name);
        let clock = Arc::clone(&self.clock);

        tokio::task::spawn_blocking(move || {
            file.transact(|current| decide(current, clock.now()))
        })
        .await
        .map_err(|e| StorageError::FileIO(format!("record file task failed: {e}")))?
    }

    fn new_record(
        &self,
        config: &LockConfiguration,
    ) -> impl Fn(chrono::DateTime<chrono::Utc>) -> LockRecord + Send + use<> {
        let name = config.name().to_string();
        let locked_by = self.holder.as_str().to_string();
        let lock_at_most_for = config.lock_at_most_for();

        move |now| LockRecord {
            name: name.clone(),
            lock_until: add_duration(now, lock_at_most_for),
            locked_at: now,
            locked_by: locked_by.clone(),
        }
    }
}

#[async_trait]
impl StorageAccessor for FileStorage {
    async fn insert_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let new_record = self.new_record(config);

        self.transact(config.name(), move |current, now| match current {
            Some(existing) if existing.is_held_at(now) => (None, false),
            _ => (Some(new_record(now)), true),
        })
        .await
    }

    async fn update_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let new_record = self.new_record(config);

        self.transact(config.name(), move |current, now| match current {
            Some(existing) if !existing.is_held_at(now) => (Some(new_record(now)), true),
            _ => (None, false),
        })
        .await
    }

    async fn unlock(&self, config: &LockConfiguration) -> StorageResult<()> {
        let holder = self.holder.as_str().to_string();
        let lock_at_least_for = config.lock_at_least_for();

        self.transact(config.name(), move |current, now| match current {
            Some(mut existing) if existing.locked_by == holder => {
                existing.lock_until = now.max(add_duration(existing.locked_at, lock_at_least_for));
                (Some(existing), ())
            }
            _ => (None, ()),
        })
        .await
    }

    async fn extend(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let holder = self.holder.as_str().to_string();
        let lock_at_most_for = config.lock_at_most_for();

        self.transact(config.name(), move |current, now| match current {
            Some(mut existing) if existing.locked_by == holder && existing.is_held_at(now) => {
                existing.lock_until = add_duration(now, lock_at_most_for);
                existing.locked_at = now;
                (Some(existing), true)
            }
            _ => (None, false),
        })
        .await
    }

    async fn find_record(&self, name: &str) -> StorageResult<Option<LockRecord>> {
        let file = RecordFile::new(&self.locks_dir, name);
        tokio::task::spawn_blocking(move || file.read())
            .await
            .map_err(|e| StorageError::FileIO(format!("record file task failed: {e}")))?
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.locks_dir).await?;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Check if base directory is accessible
        if !self.base_dir.exists() {
            return Err(StorageError::Unavailable);
        }

        // Try to create a test file
        let test_file = self.locks_dir.join(".health_check");
        tokio::fs::write(&test_file, b"ok")
            .await
            .map_err(|e| StorageError::FileIO(format!("Health check failed: {e}")))?;
        tokio::fs::remove_file(&test_file)
            .await
            .map_err(|e| StorageError::FileIO(format!("Health check cleanup failed: {e}")))?;

        Ok(())
    }

    fn strategy(&self) -> AcquireStrategy {
        AcquireStrategy::AtomicProcedure
    }

    fn holder(&self) -> &HolderIdentity {
        &self.holder
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
