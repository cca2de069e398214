//! Domain models for distributed task locks.
//!
//! This module contains the value types shared by every storage backend: the
//! per-request lock configuration, the persisted lock record, the holder
//! identity, and the clock abstraction used by backends that evaluate "now"
//! on the caller side.

pub mod clock;
pub mod holder;
pub mod lock;

pub use clock::{Clock, ManualClock, SystemClock};
pub use holder::HolderIdentity;
pub use lock::{LockConfiguration, LockRecord, MAX_LOCK_NAME_LEN};
