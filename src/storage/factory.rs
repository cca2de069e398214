//! Storage backend factory.
//!
//! Creates the appropriate storage backend based on configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::domain::{HolderIdentity, SystemClock};
use crate::error::LockError;
use crate::storage::file::FileStorage;
use crate::storage::mysql::MySqlStorage;
use crate::storage::postgres::PostgresStorage;
use crate::storage::redis::RedisStorage;
use crate::storage::traits::StorageAccessor;

/// Create a storage backend based on configuration.
///
/// The backend is health checked before it is returned, so a misconfigured
/// store fails at startup instead of on the first lock attempt.
///
/// # Errors
///
/// Returns an error if the storage backend cannot be initialized.
pub async fn create_storage(
    config: &StorageConfig,
    holder: HolderIdentity,
) -> Result<Arc<dyn StorageAccessor>, LockError> {
    let storage: Arc<dyn StorageAccessor> = match config.backend {
        StorageBackend::File => Arc::new(FileStorage::new(
            &config.file,
            holder,
            Arc::new(SystemClock),
        )?),
        StorageBackend::Redis => Arc::new(RedisStorage::connect(&config.redis, holder)?),
        StorageBackend::MySQL => Arc::new(MySqlStorage::connect(&config.mysql, holder).await?),
        StorageBackend::PostgreSQL => {
            Arc::new(PostgresStorage::connect(&config.postgresql, holder).await?)
        }
    };

    // Verify storage is healthy
    storage.health_check().await?;

    info!(
        backend = storage.backend_name(),
        strategy = %storage.strategy(),
        holder = %storage.holder(),
        "Storage initialized"
    );

    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileStorageConfig;
    use crate::storage::AcquireStrategy;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_file_storage() {
        let temp_dir = TempDir::new().unwrap();

        let config = StorageConfig {
            backend: StorageBackend::File,
            file: FileStorageConfig {
                data_dir: temp_dir.path().to_path_buf(),
            },
            ..Default::default()
        };

        let storage = create_storage(&config, HolderIdentity::new("a").unwrap())
            .await
            .unwrap();
        assert_eq!(storage.backend_name(), "file");
        assert_eq!(storage.strategy(), AcquireStrategy::AtomicProcedure);
        assert_eq!(storage.holder().as_str(), "a");
    }

    #[tokio::test]
    async fn test_unreachable_postgres_fails() {
        let mut config = StorageConfig {
            backend: StorageBackend::PostgreSQL,
            ..Default::default()
        };
        config.postgresql.url = "postgres://127.0.0.1:1/locks".to_string();
        config.postgresql.connect_timeout = 1;

        let result = create_storage(&config, HolderIdentity::new("a").unwrap()).await;
        assert!(matches!(result, Err(LockError::Storage(_))));
    }
}
