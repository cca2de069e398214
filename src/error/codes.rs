//! Error code constants.
//!
//! Error codes are organized by category:
//! - 1xxx: Configuration errors
//! - 2xxx: Usage errors (misused handles, missing lock context)
//! - 5xxx: Storage/Internal errors

/// Error code type with semantic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    // ===== Configuration Errors (1xxx) =====

    /// Invalid lock configuration.
    pub const INVALID_LOCK_CONFIG: Self = Self(1001);

    // ===== Usage Errors (2xxx) =====

    /// Handle was used after it had been released.
    pub const HANDLE_RELEASED: Self = Self(2001);

    /// Operation not supported by the provider.
    pub const UNSUPPORTED: Self = Self(2002);

    /// No lock is active in the current task.
    pub const NO_ACTIVE_LOCK: Self = Self(2003);

    /// Active lock could not be extended.
    pub const CANNOT_EXTEND: Self = Self(2004);

    // ===== Storage/Internal Errors (5xxx) =====

    /// Storage backend error.
    pub const STORAGE_ERROR: Self = Self(5001);

    /// Internal error.
    pub const INTERNAL_ERROR: Self = Self(5002);

    /// Get the error code as an i32.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Get the category of this error code.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.0 {
            1000..=1999 => ErrorCategory::Configuration,
            2000..=2999 => ErrorCategory::Usage,
            5000..=5999 => ErrorCategory::Storage,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// Error category based on error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration-related errors (1xxx).
    Configuration,
    /// Usage errors (2xxx).
    Usage,
    /// Storage and internal errors (5xxx).
    Storage,
    /// Unknown category.
    Unknown,
}

impl ErrorCategory {
    /// Process exit code for this category.
    ///
    /// `0` is success and `1` is reserved for argument errors reported by the
    /// command line parser.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::Usage => 3,
            Self::Storage => 4,
            Self::Unknown => 70,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Usage => write!(f, "usage"),
            Self::Storage => write!(f, "storage"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
