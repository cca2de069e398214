//! Storage layer module.
//!
//! Every backend implements [`StorageAccessor`], the four conditional writes
//! of the lock protocol, so the lock provider runs unchanged on top of any of
//! them.

pub mod factory;
pub mod file;
pub mod memory;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod sql;
pub mod traits;

pub use factory::create_storage;
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use mysql::MySqlStorage;
pub use postgres::PostgresStorage;
pub use redis::RedisStorage;
pub use traits::{AcquireStrategy, DynStorageAccessor, StorageAccessor};
