//! Lock defaults and holder identity.

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

use crate::domain::HolderIdentity;

/// Lock configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Holder identity override. Defaults to `{hostname}:{pid}`.
    #[serde(default)]
    pub holder: Option<String>,

    /// Default `lock_at_most_for` when a caller does not specify one.
    #[serde(default = "default_lock_at_most_for", with = "humantime_serde")]
    pub default_lock_at_most_for: Duration,

    /// Default `lock_at_least_for` when a caller does not specify one.
    #[serde(default, with = "humantime_serde")]
    pub default_lock_at_least_for: Duration,

    /// Smallest `lock_at_most_for` accepted by the keep-alive provider.
    #[serde(default = "default_keep_alive_min", with = "humantime_serde")]
    pub keep_alive_min_lock_at_most_for: Duration,
}

const fn default_lock_at_most_for() -> Duration {
    Duration::from_secs(10 * 60)
}

const fn default_keep_alive_min() -> Duration {
    Duration::from_secs(30)
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            holder: None,
            default_lock_at_most_for: default_lock_at_most_for(),
            default_lock_at_least_for: Duration::ZERO,
            keep_alive_min_lock_at_most_for: default_keep_alive_min(),
        }
    }
}

impl LockConfig {
    /// Validate the lock defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the defaults are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_lock_at_least_for > self.default_lock_at_most_for {
            return Err(ConfigError::Message(
                "lock.default_lock_at_least_for cannot exceed lock.default_lock_at_most_for"
                    .to_string(),
            ));
        }
        if self.default_lock_at_most_for.is_zero() {
            return Err(ConfigError::Message(
                "lock.default_lock_at_most_for cannot be 0".to_string(),
            ));
        }
        if self.keep_alive_min_lock_at_most_for.is_zero() {
            return Err(ConfigError::Message(
                "lock.keep_alive_min_lock_at_most_for cannot be 0".to_string(),
            ));
        }
        self.resolve_holder()
            .map(|_| ())
            .map_err(|e| ConfigError::Message(format!("lock.holder: {e}")))
    }

    /// The configured holder identity, or the detected one.
    ///
    /// # Errors
    ///
    /// Returns an error if the override is empty or too long.
    pub fn resolve_holder(&self) -> crate::error::LockResult<HolderIdentity> {
        self.holder
            .as_deref()
            .map_or_else(|| Ok(HolderIdentity::detect()), HolderIdentity::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LockConfig::default();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.default_lock_at_most_for, Duration::from_secs(600));
    }

    #[test]
    fn test_inconsistent_defaults_rejected() {
        let config = LockConfig {
            default_lock_at_least_for: Duration::from_secs(601),
            ..LockConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_keep_alive_minimum_rejected() {
        let config = LockConfig {
            keep_alive_min_lock_at_most_for: Duration::ZERO,
            ..LockConfig::default()
        };
        let err = tokio_test::assert_err!(config.validate());
        assert!(err.to_string().contains("keep_alive_min_lock_at_most_for"));
    }

    #[test]
    fn test_holder_override() {
        let config = LockConfig {
            holder: Some("batch-7".to_string()),
            ..LockConfig::default()
        };
        assert_eq!(config.resolve_holder().unwrap().as_str(), "batch-7");

        let config = LockConfig {
            holder: Some("  ".to_string()),
            ..LockConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_humantime_durations() {
        let config: LockConfig = serde_json::from_str(
            r#"{"default_lock_at_most_for": "5m", "default_lock_at_least_for": "30s"}"#,
        )
        .unwrap();
        assert_eq!(config.default_lock_at_most_for, Duration::from_secs(300));
        assert_eq!(config.default_lock_at_least_for, Duration::from_secs(30));
        assert_eq!(config.keep_alive_min_lock_at_most_for, Duration::from_secs(30));
    }
}
