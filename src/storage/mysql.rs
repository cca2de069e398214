//! `MySQL` storage backend.
//!
//! `MySQL` has no conditional upsert, so acquisition is two independently
//! atomic statements: an insert that the primary key rejects when the row
//! exists, followed by the provider's conditional update of an expired row.
//! Timestamps are `DATETIME(3)` in UTC from the server clock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::debug;

use crate::config::MySqlStorageConfig;
use crate::domain::{HolderIdentity, LockConfiguration, LockRecord};
use crate::error::{StorageError, StorageResult};
use crate::storage::sql::{validate_table_name, Statements};
use crate::storage::traits::{AcquireStrategy, StorageAccessor};

const NOW: &str = "UTC_TIMESTAMP(3)";

/// `MySQL` storage implementation.
pub struct MySqlStorage {
    pool: MySqlPool,
    holder: HolderIdentity,
    statements: Statements,
}

impl MySqlStorage {
    /// Connect a pool and build the storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the pool cannot connect.
    pub async fn connect(config: &MySqlStorageConfig, holder: HolderIdentity) -> StorageResult<Self> {
        let pool = MySqlPoolOptions::new()
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
    pub fn with_pool(pool: MySqlPool, table: &str, holder: HolderIdentity) -> StorageResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            holder,
            statements: statements(table),
        })
    }
}

fn statements(table: &str) -> Statements {
    let lock_at_most_until = format!("TIMESTAMPADD(MICROSECOND, ?, {NOW})");

    Statements {
        insert: format!(
            "INSERT INTO {table} (name, lock_until, locked_at, locked_by) \
             VALUES (?, {lock_at_most_until}, {NOW}, ?)"
        ),
        update: format!(
            "UPDATE {table} SET lock_until = {lock_at_most_until}, locked_at = {NOW}, locked_by = ? \
             WHERE name = ? AND lock_until <= {NOW}"
        ),
        unlock: format!(
            "UPDATE {table} SET lock_until = GREATEST({NOW}, TIMESTAMPADD(MICROSECOND, ?, locked_at)) \
             WHERE name = ? AND locked_by = ?"
        ),
        extend: format!(
            "UPDATE {table} SET lock_until = {lock_at_most_until}, locked_at = {NOW} \
             WHERE name = ? AND locked_by = ? AND lock_until > {NOW}"
        ),
        find: format!(
            "SELECT name, lock_until, locked_at, locked_by FROM {table} WHERE name = ?"
        ),
        create_table: format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             name VARCHAR(64) NOT NULL PRIMARY KEY, \
             lock_until DATETIME(3) NOT NULL, \
             locked_at DATETIME(3) NOT NULL, \
             locked_by VARCHAR(255) NOT NULL)"
        ),
    }
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

#[async_trait]
impl StorageAccessor for MySqlStorage {
    async fn insert_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let result = sqlx::query(&self.statements.insert)
            .bind(config.name())
            .bind(micros(config.lock_at_most_for()))
            .bind(self.holder.as_str())
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            // lock record already exists
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_record(&self, config: &LockConfiguration) -> StorageResult<bool> {
        let result = sqlx::query(&self.statements.update)
            .bind(micros(config.lock_at_most_for()))
            .bind(self.holder.as_str())
            .bind(config.name())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock(&self, config: &LockConfiguration) -> StorageResult<()> {
        sqlx::query(&self.statements.unlock)
            .bind(micros(config.lock_at_least_for()))
            .bind(config.name())
            .bind(self.holder.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn extend(&self, config: &LockConfiguration) -> StorageResult<bool> {
        debug!(lock = config.name(), until = ?config.lock_at_most_for(), "Extending lock");
        let result = sqlx::query(&self.statements.extend)
            .bind(micros(config.lock_at_most_for()))
            .bind(config.name())
            .bind(self.holder.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
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
            lock_until: row.try_get::<NaiveDateTime, _>("lock_until")?.and_utc(),
            locked_at: row.try_get::<NaiveDateTime, _>("locked_at")?.and_utc(),
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
        AcquireStrategy::InsertThenUpdate
    }

    fn holder(&self) -> &HolderIdentity {
        &self.holder
    }

    fn backend_name(&self) -> &'static str {
        "mysql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_plain_insert() {
        let statements = statements("shedlock");
        assert!(statements.insert.starts_with("INSERT INTO shedlock"));
        assert!(!statements.insert.contains("IGNORE"));
        assert!(!statements.insert.contains("ON DUPLICATE KEY"));
    }

    #[test]
    fn test_update_only_claims_expired_rows() {
        let statements = statements("shedlock");
        assert!(
            statements
                .update
                .ends_with("WHERE name = ? AND lock_until <= UTC_TIMESTAMP(3)")
        );
    }

    #[test]
    fn test_micros_saturates() {
        assert_eq!(micros(Duration::from_millis(3)), 3_000);
        assert_eq!(micros(Duration::MAX), i64::MAX);
    }
}
