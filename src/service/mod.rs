//! Service layer module.
//!
//! Lock providers and the helpers built on them: the storage based provider
//! running the acquisition protocol, wrappers adding keep-alive and
//! tracking, and the task executor with its task-local lock context.

pub mod context;
pub mod executor;
pub mod keep_alive;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod tracking;

pub use context::{assert_locked, extend_active_lock, is_locked};
pub use executor::{LockingTaskExecutor, TaskOutcome};
pub use keep_alive::{KeepAliveLock, KeepAliveLockProvider};
pub use provider::{LockProvider, SimpleLock, StorageBasedLockProvider, StorageLock};
pub use registry::LockRecordRegistry;
pub use tracking::TrackingLockProvider;
