//! Redis storage backend.
//!
//! Each lock is one hash at `{key_prefix}:{environment}:{name}` with the
//! fields `name`, `lock_until`, `locked_at` (epoch milliseconds) and
//! `locked_by`. Every operation is a Lua script, so the read and the
//! conditional write run as one atomic unit, and "now" is taken from the
//! server's `TIME`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use tracing::debug;

use crate::config::RedisStorageConfig;
use crate::domain::{HolderIdentity, LockConfiguration, LockRecord};
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{AcquireStrategy, StorageAccessor};

/// Server time in milliseconds and integer formatting for hash fields.
const PRELUDE: &str = r"
if redis.replicate_commands then redis.replicate_commands() end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local function ms(v) return string.format('%d', v) end
";

/// KEYS[1] record, ARGV[1] lock_at_most_for ms, ARGV[2] holder, ARGV[3] name.
const ACQUIRE: &str = r"
local lock_until = redis.call('HGET', KEYS[1], 'lock_until')
if lock_until and tonumber(lock_until) > now then
  return 0
end
redis.call('HSET', KEYS[1], 'name', ARGV[3], 'lock_until', ms(now + tonumber(ARGV[1])),
  'locked_at', ms(now), 'locked_by', ARGV[2])
return 1
";

/// Same arguments as `ACQUIRE`, but the record must already exist.
const UPDATE: &str = r"
local lock_until = redis.call('HGET', KEYS[1], 'lock_until')
if not lock_until or tonumber(lock_until) > now then
  return 0
end
redis.call('HSET', KEYS[1], 'name', ARGV[3], 'lock_until', ms(now + tonumber(ARGV[1])),
  'locked_at', ms(now), 'locked_by', ARGV[2])
return 1
";

/// KEYS[1] record, ARGV[1] lock_at_least_for ms, ARGV[2] holder.
const UNLOCK: &str = r"
if redis.call('HGET', KEYS[1], 'locked_by') ~= ARGV[2] then
  return 0
end
local locked_at = tonumber(redis.call('HGET', KEYS[1], 'locked_at'))
redis.call('HSET', KEYS[1], 'lock_until', ms(math.max(now, locked_at + tonumber(ARGV[1]))))
return 1
";

/// KEYS[1] record, ARGV[1] lock_at_most_for ms, ARGV[2] holder.
const EXTEND: &str = r"
if redis.call('HGET', KEYS[1], 'locked_by') ~= ARGV[2] then
  return 0
end
if tonumber(redis.call('HGET', KEYS[1], 'lock_until')) <= now then
  return 0
end
redis.call('HSET', KEYS[1], 'lock_until', ms(now + tonumber(ARGV[1])), 'locked_at', ms(now))
return 1
";

/// Largest duration in milliseconds a Lua number holds exactly.
const MAX_SCRIPT_MILLIS: u64 = 1 << 53;

/// Full script sources, sent with `EVAL`.
struct Scripts {
    acquire: String,
    update: String,
    unlock: String,
    extend: String,
}

impl Scripts {
    fn new() -> Self {
        let script = |body: &str| format!("{PRELUDE}{body}");
        Self {
            acquire: script(ACQUIRE),
            update: script(UPDATE),
            unlock: script(UNLOCK),
            extend: script(EXTEND),
        }
    }
}

/// Redis storage implementation.
pub struct RedisStorage {
    pool: Pool,
    holder: HolderIdentity,
    key_prefix: String,
    scripts: Scripts,
}

impl RedisStorage {
    /// Create a connection pool and build the storage.
    ///
    /// The pool connects lazily; use [`StorageAccessor::health_check`] to
    /// verify the server is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn connect(config: &RedisStorageConfig, holder: HolderIdentity) -> StorageResult<Self> {
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(Duration::from_secs(config.connect_timeout));
        pool_config.timeouts.create = Some(Duration::from_secs(config.connect_timeout));

        let mut redis_config = deadpool_redis::Config::from_url(config.url.clone());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(Self::with_pool(
            pool,
            &config.key_prefix,
            &config.environment,
            holder,
        ))
    }

    /// Build the storage on top of an existing pool.
    #[must_use]
    pub fn with_pool(pool: Pool, key_prefix: &str, environment: &str, holder: HolderIdentity) -> Self {
        Self {
            pool,
            holder,
            key_prefix: format!("{key_prefix}:{environment}"),
            scripts: Scripts::new(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{name}", self.key_prefix)
    }

    async fn run(
        &self,
        script: &str,
        config: &LockConfiguration,
        duration: Duration,
    ) -> StorageResult<bool> {
        let mut conn = self.pool.get().await?;
        let applied: i64 = redis::cmd("EVAL")
            .arg(script)
            .arg(1)
            .arg(self.key(config.name()))
            .arg(millis(duration))
            .arg(self.holder.as_str())
            .arg(config.name())
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis())
        .map_or(MAX_SCRIPT_MILLIS, |ms| ms.min(MAX_SCRIPT_MILLIS))
}

fn parse_instant(fields: &HashMap<String, String>, field: &str) -> StorageResult<DateTime<Utc>> {
    fields
        .get(field)
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| StorageError::Serialization(format!("invalid '{field}' in lock record")))
}

fn parse_record(name: &str, fields: &HashMap<String, String>) -> StorageResult<LockRecord> {
    Ok(LockRecord {
        name: fields.get("name").cloned().unwrap_or_else(|| name.to_string()),
        lock_until: parse_instant(fields, "lock_until")?,
        locked_at: parse_instant(fields, "locked_at")?,
        locked_by: fields
            .get("locked_by")
            .cloned()
            .ok_or_else(|| StorageError::Serialization("missing 'locked_by' in lock record".to_string()))?,
    })
}

#[async_trait]
impl StorageAccessor for RedisStorage {
    async fn insert_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        self.run(&self.scripts.acquire, config, config.lock_at_most_for())
            .await
    }

    async fn update_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        self.run(&self.scripts.update, config, config.lock_at_most_for())
            .await
    }

    async fn unlock(&self, config: &LockConfiguration) -> StorageResult<()> {
        self.run(&self.scripts.unlock, config, config.lock_at_least_for())
            .await?;
        Ok(())
    }

    async fn extend(&self, config: &LockConfiguration) -> StorageResult<bool> {
        debug!(lock = config.name(), until = ?config.lock_at_most_for(), "Extending lock");
        self.run(&self.scripts.extend, config, config.lock_at_most_for())
            .await
    }

    async fn find_record(&self, name: &str) -> StorageResult<Option<LockRecord>> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.key(name))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        parse_record(name, &fields).map(Some)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn strategy(&self) -> AcquireStrategy {
        AcquireStrategy::AtomicProcedure
    }

    fn holder(&self) -> &HolderIdentity {
        &self.holder
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
