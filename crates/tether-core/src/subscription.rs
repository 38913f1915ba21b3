// ABOUTME: Watcher registry and RAII subscription handle used by Cell and Event.
// ABOUTME: Dropping a Subscription removes its watcher; `forever` keeps it for the source's lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Shared callback stored in a registry.
pub(crate) type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// An ordered list of callbacks keyed by a monotonically increasing id.
/// Callbacks run in registration order.
pub(crate) struct Watchers<A: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<A>)>>,
}

impl<A: ?Sized> Watchers<A> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, callback: Callback<A>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(entry_id, _)| *entry_id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every callback with `arg`. The list is cloned first so callbacks
    /// may subscribe or unsubscribe without deadlocking.
    pub(crate) fn notify(&self, arg: &A) -> usize {
        let snapshot: Vec<Callback<A>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &snapshot {
            cb(arg);
        }
        snapshot.len()
    }
}

/// Handle to a registered watcher. The watcher stays active until the
/// handle is dropped or `unsubscribe` is called.
#[must_use = "dropping a Subscription immediately unsubscribes the watcher"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<A: ?Sized + 'static>(watchers: Weak<Watchers<A>>, id: u64) -> Self
    where
        Watchers<A>: Send + Sync,
    {
        Self {
            cancel: Some(Box::new(move || {
                if let Some(watchers) = watchers.upgrade() {
                    watchers.remove(id);
                    tracing::trace!(watcher = id, remaining = watchers.len(), "watcher unsubscribed");
                }
            })),
        }
    }

    /// Remove the watcher now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the watcher registered for as long as its source lives.
    pub fn forever(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
