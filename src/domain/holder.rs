//! Holder identity.

use std::sync::Arc;

use crate::error::{LockError, LockResult};

/// Longest holder identity accepted, matching the width of the `locked_by` column.
pub const MAX_HOLDER_LEN: usize = 255;

/// Opaque identity of a lock holder, written to `locked_by`.
///
/// Built once at startup and handed to every storage accessor. Two processes
/// must never share an identity, otherwise one could extend or release the
/// other's lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HolderIdentity(Arc<str>);

impl HolderIdentity {
    /// Create an identity from an explicit value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty or longer than 255 characters.
    pub fn new(value: impl AsRef<str>) -> LockResult<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(LockError::InvalidConfiguration(
                "holder identity can not be empty".to_string(),
            ));
        }
        if value.chars().count() > MAX_HOLDER_LEN {
            return Err(LockError::InvalidConfiguration(format!(
                "holder identity exceeds {MAX_HOLDER_LEN} characters"
            )));
        }
        Ok(Self(Arc::from(value)))
    }

    /// Detect the identity of the running process as `{hostname}:{pid}`.
    #[must_use]
    pub fn detect() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Self(Arc::from(format!("{host}:{}", std::process::id())))
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HolderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
