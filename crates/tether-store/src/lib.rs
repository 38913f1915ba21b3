// ABOUTME: Storage layer for tether, reached by the engine only through the adapter contract.
// ABOUTME: Provides key/value storage traits, sync and async adapters, and memory/SQLite/file backends.

pub mod adapter;
pub mod area;
pub mod file;
pub mod memory;
pub mod sqlite;
pub mod storage;

pub use adapter::{AsyncStorageAdapter, StorageAdapter, StorageHandle, SyncStorageAdapter};
pub use area::KeyArea;
pub use file::FileStorage;
pub use memory::{ForeignChanges, MemoryStorage, StorageChange};
pub use sqlite::SqliteStorage;
pub use storage::{AsyncKeyValueStorage, Blocking, KeyValueStorage, StorageError};
