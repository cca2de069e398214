//! Error handling module.
//!
//! Two layers of errors exist:
//!
//! - [`StorageError`]: a backend failed in a way that is *not* expected lock
//!   contention (connection loss, bad SQL, unreadable record file, ...).
//! - [`LockError`]: what callers of the lock provider see. Storage faults are
//!   wrapped here so the caller can tell "unknown" apart from "not acquired".
//!
//! Contention and lost ownership are never errors; they surface as `None` or
//! `false` from the provider and handle.

pub mod codes;

pub use codes::{ErrorCategory, ErrorCode};

/// Lock-level error type.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock configuration violates its invariants.
    #[error("Invalid lock configuration: {0}")]
    InvalidConfiguration(String),

    /// The handle has already been unlocked.
    #[error("Lock '{0}' has already been released")]
    HandleReleased(String),

    /// The operation is not supported by this provider or handle.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// `extend_active_lock` or `assert_locked` was called outside a locked task.
    #[error("No active lock in the current task")]
    NoActiveLock,

    /// The active lock could not be extended, most likely it already expired.
    #[error("Lock '{0}' can not be extended, most likely it already expired")]
    CannotExtend(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LockError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfiguration(_) => ErrorCode::INVALID_LOCK_CONFIG,
            Self::HandleReleased(_) => ErrorCode::HANDLE_RELEASED,
            Self::Unsupported(_) => ErrorCode::UNSUPPORTED,
            Self::NoActiveLock => ErrorCode::NO_ACTIVE_LOCK,
            Self::CannotExtend(_) => ErrorCode::CANNOT_EXTEND,
            Self::Storage(_) => ErrorCode::STORAGE_ERROR,
            Self::Internal(_) => ErrorCode::INTERNAL_ERROR,
        }
    }

    /// Process exit code used by the command line front end.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.error_code().category().exit_code()
    }
}

/// Storage-specific error type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Connection error.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Query failed: {0}")]
    Query(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Acquiring the OS-level file lock failed.
    #[error("Failed to lock record file: {0}")]
    LockFailed(String),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    FileIO(String),

    /// Backend not available.
    #[error("Storage backend unavailable")]
    Unavailable,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::FileIO(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for StorageError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Connection(err.to_string())
        } else {
            Self::Query(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StorageError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Result type alias using `LockError`.
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Result type alias using `StorageError`.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LockError::InvalidConfiguration("test".to_string()).error_code(),
            ErrorCode::INVALID_LOCK_CONFIG
        );
        assert_eq!(
            LockError::Storage(StorageError::Unavailable).error_code(),
            ErrorCode::STORAGE_ERROR
        );
        assert_eq!(LockError::NoActiveLock.error_code(), ErrorCode::NO_ACTIVE_LOCK);
    }

    #[test]
    fn test_storage_faults_are_distinct_from_usage_errors() {
        assert_ne!(
            LockError::Storage(StorageError::Unavailable).exit_code(),
            LockError::HandleReleased("x".to_string()).exit_code()
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err: StorageError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, StorageError::FileIO(_)));
    }

    #[test]
    fn test_sqlx_pool_timeout_is_connection_error() {
        let err: StorageError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StorageError::Connection(_)));
    }
}
