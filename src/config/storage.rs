//! Storage configuration.

use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// File-based storage (development/single host).
    #[default]
    File,
    /// Redis storage, acquisition through server-side scripts.
    Redis,
    /// `MySQL` storage, insert then conditional update.
    #[serde(rename = "mysql")]
    MySQL,
    /// `PostgreSQL` storage, conditional upsert.
    #[serde(rename = "postgresql")]
    PostgreSQL,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Redis => write!(f, "redis"),
            Self::MySQL => write!(f, "mysql"),
            Self::PostgreSQL => write!(f, "postgresql"),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type.
    #[serde(default)]
    pub backend: StorageBackend,

    /// File storage configuration.
    #[serde(default)]
    pub file: FileStorageConfig,

    /// Redis storage configuration.
    #[serde(default)]
    pub redis: RedisStorageConfig,

    /// `MySQL` storage configuration.
    #[serde(default)]
    pub mysql: MySqlStorageConfig,

    /// `PostgreSQL` storage configuration.
    #[serde(default)]
    pub postgresql: PostgresStorageConfig,
}

impl StorageConfig {
    /// Validate the storage configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration fields are missing for the selected backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            StorageBackend::File => Ok(()),
            StorageBackend::Redis => {
                if self.redis.url.is_empty() {
                    return Err(ConfigError::Message(
                        "storage.redis.url cannot be empty".to_string(),
                    ));
                }
                if self.redis.pool_size == 0 {
                    return Err(ConfigError::Message(
                        "storage.redis.pool_size cannot be 0".to_string(),
                    ));
                }
                Ok(())
            }
            StorageBackend::MySQL => {
                if self.mysql.url.is_empty() {
                    return Err(ConfigError::Message(
                        "storage.mysql.url cannot be empty".to_string(),
                    ));
                }
                validate_pool("storage.mysql", self.mysql.min_connections, self.mysql.max_connections)
            }
            StorageBackend::PostgreSQL => {
                if self.postgresql.url.is_empty() {
                    return Err(ConfigError::Message(
                        "storage.postgresql.url cannot be empty".to_string(),
                    ));
                }
                validate_pool(
                    "storage.postgresql",
                    self.postgresql.min_connections,
                    self.postgresql.max_connections,
                )
            }
        }
    }
}

fn validate_pool(section: &str, min: u32, max: u32) -> Result<(), ConfigError> {
    if max == 0 || min > max {
        return Err(ConfigError::Message(format!(
            "{section}: need 0 < max_connections and min_connections <= max_connections"
        )));
    }
    Ok(())
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FileStorageConfig {
    /// Directory for storing lock record files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisStorageConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// First segment of every lock key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Second segment of every lock key, separating deployments that share one server.
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

const fn default_pool_size() -> usize {
    10
}

const fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "job-lock".to_string()
}

fn default_environment() -> String {
    "default".to_string()
}

impl Default for RedisStorageConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout: default_connect_timeout(),
            key_prefix: default_key_prefix(),
            environment: default_environment(),
        }
    }
}

/// `MySQL` storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MySqlStorageConfig {
    /// `MySQL` connection URL.
    #[serde(default)]
    pub url: String,

    /// Lock table name, optionally schema-qualified.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Connection pool minimum size.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection pool maximum size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_table_name() -> String {
    "shedlock".to_string()
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for MySqlStorageConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            table_name: default_table_name(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// `PostgreSQL` storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresStorageConfig {
    /// `PostgreSQL` connection URL.
    #[serde(default)]
    pub url: String,

    /// Lock table name, optionally schema-qualified.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Connection pool minimum size.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection pool maximum size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for PostgresStorageConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            table_name: default_table_name(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}
