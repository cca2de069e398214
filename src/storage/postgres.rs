//! `PostgreSQL` storage backend.
//!
//! Acquisition is one conditional upsert: the row is inserted, or rewritten
//! only when its lease has expired. All timestamps come from the database
//! clock, so callers with skewed clocks still agree on ownership.
//!
//! Schema:
//! ```sql
//! CREATE TABLE shedlock (
//!     name       VARCHAR(64)  NOT NULL PRIMARY KEY,
//!     lock_until TIMESTAMPTZ  NOT NULL,
//!     locked_at  TIMESTAMPTZ  NOT NULL,
//!     locked_by  VARCHAR(255) NOT NULL
//! );
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::debug;

use crate::config::PostgresStorageConfig;
use crate::domain::{HolderIdentity, LockConfiguration, LockRecord};
use crate::error::{StorageError, StorageResult};
use crate::storage::sql::{validate_table_name, Statements};
use crate::storage::traits::{AcquireStrategy, StorageAccessor};

const NOW: &str = "CURRENT_TIMESTAMP";

/// `PostgreSQL` storage implementation.
pub struct PostgresStorage {
    pool: PgPool,
    holder: HolderIdentity,
    statements: Statements,
}

impl PostgresStorage {
    /// Connect a pool and build the storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the pool cannot connect.
    pub async fn connect(
        config: &PostgresStorageConfig,
        holder: HolderIdentity,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Self::with_pool(pool, &config.table_name, holder)
    }

    /// Build the storage on top of an existing pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid.
    pub fn with_pool(pool: PgPool, table: &str, holder: HolderIdentity) -> StorageResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            holder,
            statements: statements(table),
        })
    }
}

fn statements(table: &str) -> Statements {
    let lock_at_most_until = format!("{NOW} + make_interval(secs => $2)");
    let lock_at_least_until = "locked_at + make_interval(secs => $2)";

    Statements {
        insert: format!(
            "INSERT INTO {table} (name, lock_until, locked_at, locked_by) \
             VALUES ($1, {lock_at_most_until}, {NOW}, $3) \
             ON CONFLICT (name) DO UPDATE \
             SET lock_until = EXCLUDED.lock_until, locked_at = EXCLUDED.locked_at, locked_by = EXCLUDED.locked_by \
             WHERE {table}.lock_until <= {NOW}"
        ),
        update: format!(
            "UPDATE {table} SET lock_until = {lock_at_most_until}, locked_at = {NOW}, locked_by = $3 \
             WHERE name = $1 AND lock_until <= {NOW}"
        ),
        unlock: format!(
            "UPDATE {table} SET lock_until = GREATEST({NOW}, {lock_at_least_until}) \
             WHERE name = $1 AND locked_by = $3"
        ),
        extend: format!(
            "UPDATE {table} SET lock_until = {lock_at_most_until}, locked_at = {NOW} \
             WHERE name = $1 AND locked_by = $3 AND lock_until > {NOW}"
        ),
        find: format!(
            "SELECT name, lock_until, locked_at, locked_by FROM {table} WHERE name = $1"
        ),
        create_table: format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             name VARCHAR(64) NOT NULL PRIMARY KEY, \
             lock_until TIMESTAMPTZ NOT NULL, \
             locked_at TIMESTAMPTZ NOT NULL, \
             locked_by VARCHAR(255) NOT NULL)"
        ),
    }
}

/// Seconds with millisecond precision, as `make_interval` expects.
fn seconds(duration: Duration) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = duration.as_millis().min(u128::from(u64::MAX)) as f64;
    millis / 1000.0
}

impl PostgresStorage {
    async fn execute(&self, sql: &str, name: &str, duration: Duration) -> StorageResult<u64> {
        let result = sqlx::query(sql)
            .bind(name)
            .bind(seconds(duration))
            .bind(self.holder.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StorageAccessor for PostgresStorage {
    async fn insert_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let rows = self
            .execute(&self.statements.insert, config.name(), config.lock_at_most_for())
            .await?;
        Ok(rows > 0)
    }

    async fn update_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let rows = self
            .execute(&self.statements.update, config.name(), config.lock_at_most_for())
            .await?;
        Ok(rows > 0)
    }

    async fn unlock(&self, config: &LockConfiguration) -> StorageResult<()> {
        self.execute(&self.statements.unlock, config.name(), config.lock_at_least_for())
            .await?;
        Ok(())
    }

    async fn extend(&self, config: &LockConfiguration) -> StorageResult<bool> {
        debug!(lock = config.name(), until = ?config.lock_at_most_for(), "Extending lock");
        let rows = self
            .execute(&self.statements.extend, config.name(), config.lock_at_most_for())
            .await?;
        Ok(rows > 0)
    }

    async fn find_record(&self, name: &str) -> StorageResult<Option<LockRecord>> {
        let row = sqlx::query(&self.statements.find)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(LockRecord {
            name: row.try_get("name")?,
            lock_until: row.try_get::<DateTime<Utc>, _>("lock_until")?,
            locked_at: row.try_get::<DateTime<Utc>, _>("locked_at")?,
            locked_by: row.try_get("locked_by")?,
        }))
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(&self.statements.create_table)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    fn strategy(&self) -> AcquireStrategy {
        AcquireStrategy::AtomicUpsert
    }

    fn holder(&self) -> &HolderIdentity {
        &self.holder
    }

    fn backend_name(&self) -> &'static str {
        "postgresql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_only_overwrites_expired_rows() {
        let statements = statements("shedlock");
        assert!(statements.insert.contains("ON CONFLICT (name) DO UPDATE"));
        assert!(
            statements
                .insert
                .ends_with("WHERE shedlock.lock_until <= CURRENT_TIMESTAMP")
        );
    }

    #[test]
    fn test_extend_and_unlock_are_owner_guarded() {
        let statements = statements("locks");
        assert!(statements.extend.contains("locked_by = $3 AND lock_until > CURRENT_TIMESTAMP"));
        assert!(statements.unlock.contains("GREATEST(CURRENT_TIMESTAMP, locked_at"));
        assert!(statements.unlock.ends_with("locked_by = $3"));
    }

    #[test]
    fn test_seconds_keeps_millis() {
        assert!((seconds(Duration::from_millis(1500)) - 1.5).abs() < f64::EPSILON);
        assert!((seconds(Duration::ZERO)).abs() < f64::EPSILON);
    }
}
