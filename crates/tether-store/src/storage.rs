// ABOUTME: Raw string key/value storage contracts, one synchronous and one asynchronous.
// ABOUTME: Blocking lifts any synchronous storage onto the blocking thread pool as async storage.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::CodecError;
use thiserror::Error;

use crate::area::KeyArea;

/// Errors that can occur while reading or writing storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("quota exceeded writing {key}: needs {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Synchronous string storage in the shape of Web Storage.
pub trait KeyValueStorage: Send + Sync {
    /// Returns `None` when the key is absent.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn key_area(&self) -> KeyArea;
}

/// Asynchronous string storage.
#[async_trait]
pub trait AsyncKeyValueStorage: Send + Sync {
    /// Returns `None` when the key is absent.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    fn key_area(&self) -> KeyArea;
}

/// Runs a synchronous storage on tokio's blocking pool so slow backends
/// (a SQLite file on a busy disk) never stall the async workers.
pub struct Blocking<S> {
    inner: Arc<S>,
}

impl<S> Blocking<S> {
    pub fn new(storage: S) -> Self {
        Self {
            inner: Arc::new(storage),
        }
    }

    pub fn from_arc(storage: Arc<S>) -> Self {
        Self { inner: storage }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

#[async_trait]
impl<S> AsyncKeyValueStorage for Blocking<S>
where
    S: KeyValueStorage + 'static,
{
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let inner = Arc::clone(&self.inner);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || inner.get_item(&key)).await?
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let inner = Arc::clone(&self.inner);
        let key = key.to_owned();
        let value = value.to_owned();
        tokio::task::spawn_blocking(move || inner.set_item(&key, &value)).await?
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let inner = Arc::clone(&self.inner);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || inner.remove_item(&key)).await?
    }

    fn key_area(&self) -> KeyArea {
        self.inner.key_area()
    }
}
