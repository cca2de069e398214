//! Lock configuration and lock record types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LockError, LockResult};

/// Longest lock name accepted, matching the width of the `name` column.
pub const MAX_LOCK_NAME_LEN: usize = 64;

/// Describes one lock request.
///
/// Durations are relative: backends that own the clock (SQL, Redis) add them
/// to their own "now" inside the write, so caller clock skew never leaks into
/// the stored lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfiguration {
    name: String,
    lock_at_most_for: Duration,
    lock_at_least_for: Duration,
}

impl LockConfiguration {
    /// Create a validated lock configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] if the name is empty or too
    /// long, or if `lock_at_least_for` is longer than `lock_at_most_for`.
    pub fn new(
        name: impl Into<String>,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> LockResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(LockError::InvalidConfiguration(
                "lock name can not be empty".to_string(),
            ));
        }
        if name.chars().count() > MAX_LOCK_NAME_LEN {
            return Err(LockError::InvalidConfiguration(format!(
                "lock name '{name}' exceeds {MAX_LOCK_NAME_LEN} characters"
            )));
        }
        if lock_at_least_for > lock_at_most_for {
            return Err(LockError::InvalidConfiguration(format!(
                "lock_at_least_for is longer than lock_at_most_for for lock '{name}'"
            )));
        }

        Ok(Self {
            name,
            lock_at_most_for,
            lock_at_least_for,
        })
    }

    /// Build a configuration for the same lock with new durations.
    ///
    /// # Errors
    ///
    /// Returns an error if the durations are inconsistent.
    pub fn with_durations(
        &self,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
    ) -> LockResult<Self> {
        Self::new(self.name.clone(), lock_at_most_for, lock_at_least_for)
    }

    /// Lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum time the lock is held without renewal.
    #[must_use]
    pub const fn lock_at_most_for(&self) -> Duration {
        self.lock_at_most_for
    }

    /// Minimum time the lock stays held after acquisition.
    #[must_use]
    pub const fn lock_at_least_for(&self) -> Duration {
        self.lock_at_least_for
    }
}

impl std::fmt::Display for LockConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (at most {:?}, at least {:?})",
            self.name, self.lock_at_most_for, self.lock_at_least_for
        )
    }
}

/// Persisted state of one lock.
///
/// The record is held iff `lock_until > now` by the backend clock. Expired
/// records stay in the store and are overwritten by the next acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Lock name (primary key).
    pub name: String,
    /// Instant until which the lease is held.
    pub lock_until: DateTime<Utc>,
    /// Instant the current holder acquired or last extended the lease.
    pub locked_at: DateTime<Utc>,
    /// Identity of the current or last holder.
    pub locked_by: String,
}

impl LockRecord {
    /// Whether the lease is live at `now`.
    #[must_use]
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_until > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_configuration() {
        let config =
            LockConfiguration::new("report", Duration::from_secs(600), Duration::from_secs(60))
                .unwrap();
        assert_eq!(config.name(), "report");
        assert_eq!(config.lock_at_most_for(), Duration::from_secs(600));
        assert_eq!(config.lock_at_least_for(), Duration::from_secs(60));
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = LockConfiguration::new("", Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_long_name_rejected() {
        let name = "x".repeat(MAX_LOCK_NAME_LEN + 1);
        assert!(LockConfiguration::new(name, Duration::from_secs(1), Duration::ZERO).is_err());

        let name = "x".repeat(MAX_LOCK_NAME_LEN);
        assert!(LockConfiguration::new(name, Duration::from_secs(1), Duration::ZERO).is_ok());
    }

    #[test]
    fn test_at_least_longer_than_at_most_rejected() {
        let result =
            LockConfiguration::new("job", Duration::from_secs(10), Duration::from_secs(11));
        assert!(result.is_err());
    }

    #[test]
    fn test_with_durations_keeps_name() {
        let config = LockConfiguration::new("job", Duration::from_secs(10), Duration::ZERO).unwrap();
        let extended = config
            .with_durations(Duration::from_secs(30), Duration::from_secs(5))
            .unwrap();
        assert_eq!(extended.name(), "job");
        assert_eq!(extended.lock_at_most_for(), Duration::from_secs(30));
        assert!(config
            .with_durations(Duration::from_secs(1), Duration::from_secs(2))
            .is_err());
    }

    #[test]
    fn test_record_is_held() {
        let now = Utc::now();
        let record = LockRecord {
            name: "job".to_string(),
            lock_until: now + chrono::Duration::seconds(5),
            locked_at: now,
            locked_by: "host:1".to_string(),
        };
        assert!(record.is_held_at(now));
        assert!(!record.is_held_at(now + chrono::Duration::seconds(5)));
        assert!(!record.is_held_at(now + chrono::Duration::seconds(6)));
    }
}
