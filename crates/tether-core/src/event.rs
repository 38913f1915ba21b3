// ABOUTME: Zero-payload event that calls its watchers each time it is fired.
// ABOUTME: Used as the pickup channel that asks a persistence engine to re-read storage.

use std::sync::Arc;

use crate::subscription::{Subscription, Watchers};

/// A triggerable signal without a payload. Clones fire the same watchers.
#[derive(Clone)]
pub struct Event {
    watchers: Arc<Watchers<()>>,
}

impl Event {
    pub fn new() -> Self {
        Self {
            watchers: Arc::new(Watchers::new()),
        }
    }

    /// Fire the event, synchronously calling every watcher.
    /// Returns how many watchers were called.
    pub fn fire(&self) -> usize {
        self.watchers.notify(&())
    }

    /// Register `f` to run on every future `fire`.
    pub fn watch(&self, f: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.watchers.add(Arc::new(move |_: &()| f()));
        Subscription::new(Arc::downgrade(&self.watchers), id)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("watchers", &self.watchers.len())
            .finish()
    }
}
