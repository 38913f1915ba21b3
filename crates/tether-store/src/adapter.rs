// ABOUTME: The adapter contract the persistence engine depends on, plus its two implementations.
// ABOUTME: An adapter produces per-key handles whose get/set decode and encode through a Codec.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{Codec, JsonCodec};

use crate::area::KeyArea;
use crate::storage::{AsyncKeyValueStorage, KeyValueStorage, StorageError};

/// Typed access to one storage slot.
#[async_trait]
pub trait StorageHandle<T: Send + Sync + 'static>: Send + Sync {
    /// The key this handle is bound to.
    fn key(&self) -> &str;

    /// Read and decode the slot. `Ok(None)` means the key is absent.
    async fn get(&self) -> Result<Option<T>, StorageError>;

    /// Encode and write `value` to the slot.
    async fn set(&self, value: &T) -> Result<(), StorageError>;
}

/// Produces storage handles bound to keys.
pub trait StorageAdapter<T: Send + Sync + 'static>: Send + Sync {
    /// Bind a handle to `key`. Performs no I/O.
    fn handle(&self, key: &str) -> Arc<dyn StorageHandle<T>>;

    /// Identity of the storage every handle of this adapter reaches.
    fn key_area(&self) -> KeyArea;
}

/// Adapter over a synchronous `KeyValueStorage`.
pub struct SyncStorageAdapter<S, C = JsonCodec> {
    storage: Arc<S>,
    codec: Arc<C>,
}

impl<S> SyncStorageAdapter<S, JsonCodec> {
    pub fn new(storage: S) -> Self {
        Self::from_arc(Arc::new(storage))
    }

    pub fn from_arc(storage: Arc<S>) -> Self {
        Self {
            storage,
            codec: Arc::new(JsonCodec),
        }
    }
}

impl<S, C> SyncStorageAdapter<S, C> {
    /// Replace the codec used to encode and decode values.
    pub fn with_codec<C2>(self, codec: C2) -> SyncStorageAdapter<S, C2> {
        SyncStorageAdapter {
            storage: self.storage,
            codec: Arc::new(codec),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

impl<S, C> Clone for SyncStorageAdapter<S, C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            codec: Arc::clone(&self.codec),
        }
    }
}

struct SyncHandle<S, C> {
    storage: Arc<S>,
    codec: Arc<C>,
    key: String,
}

#[async_trait]
impl<T, S, C> StorageHandle<T> for SyncHandle<S, C>
where
    T: Send + Sync + 'static,
    S: KeyValueStorage + 'static,
    C: Codec<T> + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    async fn get(&self) -> Result<Option<T>, StorageError> {
        match self.storage.get_item(&self.key)? {
            Some(raw) => Ok(Some(self.codec.decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, value: &T) -> Result<(), StorageError> {
        let raw = self.codec.encode(value)?;
        self.storage.set_item(&self.key, &raw)
    }
}

impl<T, S, C> StorageAdapter<T> for SyncStorageAdapter<S, C>
where
    T: Send + Sync + 'static,
    S: KeyValueStorage + 'static,
    C: Codec<T> + 'static,
{
    fn handle(&self, key: &str) -> Arc<dyn StorageHandle<T>> {
        Arc::new(SyncHandle {
            storage: Arc::clone(&self.storage),
            codec: Arc::clone(&self.codec),
            key: key.to_owned(),
        })
    }

    fn key_area(&self) -> KeyArea {
        self.storage.key_area()
    }
}

/// Adapter over an `AsyncKeyValueStorage`.
pub struct AsyncStorageAdapter<S, C = JsonCodec> {
    storage: Arc<S>,
    codec: Arc<C>,
}

impl<S> AsyncStorageAdapter<S, JsonCodec> {
    pub fn new(storage: S) -> Self {
        Self::from_arc(Arc::new(storage))
    }

    pub fn from_arc(storage: Arc<S>) -> Self {
        Self {
            storage,
            codec: Arc::new(JsonCodec),
        }
    }
}

impl<S, C> AsyncStorageAdapter<S, C> {
    /// Replace the codec used to encode and decode values.
    pub fn with_codec<C2>(self, codec: C2) -> AsyncStorageAdapter<S, C2> {
        AsyncStorageAdapter {
            storage: self.storage,
            codec: Arc::new(codec),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

impl<S, C> Clone for AsyncStorageAdapter<S, C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            codec: Arc::clone(&self.codec),
        }
    }
}

struct AsyncHandle<S, C> {
    storage: Arc<S>,
    codec: Arc<C>,
    key: String,
}

#[async_trait]
impl<T, S, C> StorageHandle<T> for AsyncHandle<S, C>
where
    T: Send + Sync + 'static,
    S: AsyncKeyValueStorage + 'static,
    C: Codec<T> + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    async fn get(&self) -> Result<Option<T>, StorageError> {
        match self.storage.get_item(&self.key).await? {
            Some(raw) => Ok(Some(self.codec.decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, value: &T) -> Result<(), StorageError> {
        let raw = self.codec.encode(value)?;
        self.storage.set_item(&self.key, &raw).await
    }
}

impl<T, S, C> StorageAdapter<T> for AsyncStorageAdapter<S, C>
where
    T: Send + Sync + 'static,
    S: AsyncKeyValueStorage + 'static,
    C: Codec<T> + 'static,
{
    fn handle(&self, key: &str) -> Arc<dyn StorageHandle<T>> {
        Arc::new(AsyncHandle {
            storage: Arc::clone(&self.storage),
            codec: Arc::clone(&self.codec),
            key: key.to_owned(),
        })
    }

    fn key_area(&self) -> KeyArea {
        self.storage.key_area()
    }
}
