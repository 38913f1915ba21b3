// ABOUTME: Typed configuration for attaching a Cell to a storage adapter.
// ABOUTME: Covers key override, pickup event, early error handler, miss policy, and write ordering.

use std::sync::Arc;

use tether_core::{Cell, Event};
use tether_store::StorageAdapter;

use crate::error::{ErrorHandler, PersistError};

/// What to do when the storage slot is empty at rehydration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Leave storage empty; the cell keeps its default.
    #[default]
    KeepDefault,
    /// Write the default to storage immediately so later reads observe it.
    WriteDefault,
}

/// How write-backs for successive cell updates relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteOrder {
    /// Every update issues its write at once. Writes may complete out of
    /// order when the backend is asynchronous.
    #[default]
    Concurrent,
    /// A write is issued only after the previous one completed, so the last
    /// update always determines the persisted value. A write that never
    /// completes holds back every later write.
    Sequential,
}

/// Everything `persist` needs. An adapter is always required; there is no
/// process-wide default backend.
pub struct PersistConfig<T: Send + Sync + 'static> {
    pub(crate) cell: Cell<T>,
    pub(crate) adapter: Arc<dyn StorageAdapter<T>>,
    pub(crate) key: Option<String>,
    pub(crate) pickup: Option<Event>,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) miss_policy: MissPolicy,
    pub(crate) write_order: WriteOrder,
}

impl<T> PersistConfig<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(cell: &Cell<T>, adapter: impl StorageAdapter<T> + 'static) -> Self {
        Self::with_shared_adapter(cell, Arc::new(adapter))
    }

    pub fn with_shared_adapter(cell: &Cell<T>, adapter: Arc<dyn StorageAdapter<T>>) -> Self {
        Self {
            cell: cell.clone(),
            adapter,
            key: None,
            pickup: None,
            on_error: None,
            miss_policy: MissPolicy::default(),
            write_order: WriteOrder::default(),
        }
    }

    /// Storage key to use instead of the cell's name.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Event that forces a re-read of storage each time it fires.
    pub fn pickup(mut self, event: &Event) -> Self {
        self.pickup = Some(event.clone());
        self
    }

    /// Error handler installed before rehydration starts, so initial read
    /// failures are observed too.
    pub fn on_error(mut self, handler: impl Fn(&PersistError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }

    pub fn write_order(mut self, order: WriteOrder) -> Self {
        self.write_order = order;
        self
    }

    /// The key the attachment will use.
    pub fn resolved_key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| self.cell.name().to_owned())
    }
}
