// ABOUTME: In-memory Web-Storage-like backend shared between any number of contexts.
// ABOUTME: Broadcasts every mutation so other contexts can react, and can enforce a byte quota.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use ulid::Ulid;

use crate::area::KeyArea;
use crate::storage::{KeyValueStorage, StorageError};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A mutation observed on a shared storage area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// The context that performed the mutation.
    pub origin: Ulid,
}

struct SharedArea {
    items: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    changes: broadcast::Sender<StorageChange>,
}

/// Shared in-memory storage.
///
/// Cloning yields a handle on the same context. `open_context` yields a
/// handle on the same data but with a fresh context id, modelling a second
/// window or process sharing the storage: changes it makes are visible to
/// the first context through `foreign_changes`.
#[derive(Clone)]
pub struct MemoryStorage {
    area: Arc<SharedArea>,
    context: Ulid,
}

impl MemoryStorage {
    /// Create an empty storage without a quota.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty storage that rejects writes once the summed byte
    /// length of all keys and values would exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self::build(Some(bytes))
    }

    fn build(quota: Option<usize>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            area: Arc::new(SharedArea {
                items: RwLock::new(BTreeMap::new()),
                quota,
                changes,
            }),
            context: Ulid::new(),
        }
    }

    /// A new context over the same data.
    pub fn open_context(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            context: Ulid::new(),
        }
    }

    pub fn context_id(&self) -> Ulid {
        self.context
    }

    /// Every change, including those made by this context.
    pub fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.area.changes.subscribe()
    }

    /// Changes made by other contexts only.
    pub fn foreign_changes(&self) -> ForeignChanges {
        ForeignChanges {
            rx: self.area.changes.subscribe(),
            context: self.context,
        }
    }

    /// Bytes currently used, counted as key plus value lengths.
    pub fn used_bytes(&self) -> usize {
        let items = self.area.items.read().unwrap_or_else(PoisonError::into_inner);
        items.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        // No subscribers is fine.
        let _ = self.area.changes.send(StorageChange {
            key: key.to_owned(),
            old_value,
            new_value,
            origin: self.context,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.area.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let old_value = {
            let mut items = self.area.items.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(quota) = self.area.quota {
                let used: usize = items
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                let needed = key.len() + value.len();
                let available = quota.saturating_sub(used);
                if needed > available {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_owned(),
                        needed,
                        available,
                    });
                }
            }
            items.insert(key.to_owned(), value.to_owned())
        };
        self.publish(key, old_value, Some(value.to_owned()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let old_value = self
            .area
            .items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.publish(key, old_value, None);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let items = self.area.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.keys().cloned().collect())
    }

    fn key_area(&self) -> KeyArea {
        KeyArea::shared(&self.area)
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("context", &self.context)
            .field("quota", &self.area.quota)
            .finish()
    }
}

/// Receiver of changes made by contexts other than the one that created it.
pub struct ForeignChanges {
    rx: broadcast::Receiver<StorageChange>,
    context: Ulid,
}

impl ForeignChanges {
    /// Wait for the next change made by another context.
    pub async fn recv(&mut self) -> Result<StorageChange, broadcast::error::RecvError> {
        loop {
            let change = self.rx.recv().await?;
            if change.origin != self.context {
                return Ok(change);
            }
        }
    }
}
