//! Storage accessor trait definitions.
//!
//! A storage accessor turns a record store into the four conditional writes
//! the lock protocol needs. Each backend absorbs its own atomicity primitive
//! (unique-key insert, conditional update, upsert, server-side script, file
//! lock) behind the same contract, so the provider stays backend-agnostic.

use async_trait::async_trait;

use crate::domain::{HolderIdentity, LockConfiguration, LockRecord};
use crate::error::StorageResult;

/// How a backend decides ownership on acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStrategy {
    /// Insert rejected on duplicate key, then a conditional update of the
    /// existing row. Two independently atomic round trips.
    InsertThenUpdate,
    /// One conditional upsert: insert, or update only if expired.
    AtomicUpsert,
    /// Read and conditionally write inside one server-evaluated atomic unit.
    AtomicProcedure,
}

impl AcquireStrategy {
    /// Whether `insert_record` alone settles acquisition, including
    /// reclaiming an expired record.
    #[must_use]
    pub const fn insert_reclaims_expired(self) -> bool {
        !matches!(self, Self::InsertThenUpdate)
    }
}

impl std::fmt::Display for AcquireStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsertThenUpdate => write!(f, "insert-then-update"),
            Self::AtomicUpsert => write!(f, "atomic-upsert"),
            Self::AtomicProcedure => write!(f, "atomic-procedure"),
        }
    }
}

/// Backend-specific implementation of the lock record operations.
///
/// Every method is a single atomic round trip. Expected contention and lost
/// ownership are reported as `false`; only genuine backend faults are errors.
#[async_trait]
pub trait StorageAccessor: Send + Sync {
    /// Create the record with `lock_until = now + lock_at_most_for`,
    /// `locked_at = now`, `locked_by = holder`.
    ///
    /// Succeeds only if no record exists, or, when
    /// [`AcquireStrategy::insert_reclaims_expired`] holds, if the existing
    /// record is expired. Returns `false` when a live record blocked the write.
    async fn insert_record(&self, config: &LockConfiguration) -> StorageResult<bool>;

    /// Claim an existing, expired record (`lock_until <= now`).
    ///
    /// Returns `true` iff exactly one record was rewritten.
    async fn update_record(&self, config: &LockConfiguration) -> StorageResult<bool>;

    /// Release: `lock_until = max(now, locked_at + lock_at_least_for)` where
    /// `locked_by = holder`. Never lengthens a lease held by someone else.
    async fn unlock(&self, config: &LockConfiguration) -> StorageResult<()>;

    /// Renew: `lock_until = now + lock_at_most_for`, `locked_at = now` where
    /// `locked_by = holder AND lock_until > now`.
    ///
    /// Returns `false` if ownership was lost.
    async fn extend(&self, config: &LockConfiguration) -> StorageResult<bool>;

    /// Read the current record for inspection. Not part of the ownership
    /// decision.
    async fn find_record(&self, name: &str) -> StorageResult<Option<LockRecord>>;

    /// Create the backing table or directory if it does not exist.
    async fn ensure_schema(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Check if the storage backend is healthy and reachable.
    async fn health_check(&self) -> StorageResult<()>;

    /// Acquisition strategy this backend supports.
    fn strategy(&self) -> AcquireStrategy;

    /// Identity written to `locked_by`.
    fn holder(&self) -> &HolderIdentity;

    /// Get the storage backend name.
    fn backend_name(&self) -> &'static str;
}

/// Trait object alias for `StorageAccessor`.
pub type DynStorageAccessor = dyn StorageAccessor;
