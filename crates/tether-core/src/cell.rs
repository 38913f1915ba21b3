// ABOUTME: Observable state cell holding a current value and notifying watchers on assignment.
// ABOUTME: `set` notifies only when the value changes; `force` always notifies.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::subscription::{Subscription, Watchers};

struct CellInner<T> {
    name: String,
    value: RwLock<T>,
    outbox: Mutex<Outbox<T>>,
    watchers: Arc<Watchers<T>>,
}

/// Assigned values waiting to be delivered. Values enter in assignment order
/// and a single thread at a time delivers them, so watchers never see an
/// older value after a newer one.
struct Outbox<T> {
    queue: VecDeque<T>,
    delivering: bool,
}

/// Clears the delivering flag if a watcher panics mid-delivery.
struct DeliveryGuard<'a, T> {
    outbox: &'a Mutex<Outbox<T>>,
    armed: bool,
}

impl<T> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.outbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .delivering = false;
        }
    }
}

/// A named, shareable holder of a value of type `T`.
///
/// Clones share the same value and watcher list. The name is stable for the
/// life of the cell and is used as the default storage key when the cell is
/// persisted.
pub struct Cell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cell with the given name and initial value.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                name: name.into(),
                value: RwLock::new(initial),
                outbox: Mutex::new(Outbox {
                    queue: VecDeque::new(),
                    delivering: false,
                }),
                watchers: Arc::new(Watchers::new()),
            }),
        }
    }

    /// The identifying name given at construction.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A clone of the current value.
    pub fn get(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Assign `value` and notify watchers if it differs from the current one.
    /// Returns whether watchers were notified.
    pub fn set(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let deliver = {
            let mut current = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *current == value {
                return false;
            }
            *current = value.clone();
            self.enqueue(value)
        };
        if deliver {
            self.deliver();
        }
        true
    }

    /// Assign `value` and notify watchers unconditionally, even when it
    /// equals the current value.
    pub fn force(&self, value: T) {
        let deliver = {
            let mut current = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *current = value.clone();
            self.enqueue(value)
        };
        tracing::trace!(cell = %self.inner.name, "forced cell update");
        if deliver {
            self.deliver();
        }
    }

    /// Queue a notification. Must be called while the value lock is held so
    /// the queue order matches assignment order. Returns true when the caller
    /// has to deliver; otherwise a delivery already in progress will.
    fn enqueue(&self, value: T) -> bool {
        let mut outbox = self
            .inner
            .outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outbox.queue.push_back(value);
        !std::mem::replace(&mut outbox.delivering, true)
    }

    /// Notify watchers of every queued value, oldest first. A watcher that
    /// assigns the cell queues its notification behind the current one.
    fn deliver(&self) {
        let mut guard = DeliveryGuard {
            outbox: &self.inner.outbox,
            armed: true,
        };
        loop {
            let next = {
                let mut outbox = self
                    .inner
                    .outbox
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let next = outbox.queue.pop_front();
                // Hand-off happens under the lock so a concurrent enqueue
                // either lands before this check or becomes the deliverer.
                if next.is_none() {
                    outbox.delivering = false;
                }
                next
            };
            match next {
                Some(value) => {
                    self.inner.watchers.notify(&value);
                }
                None => {
                    guard.armed = false;
                    break;
                }
            }
        }
    }

    /// Compute the next value from the current one and `set` it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool
    where
        T: PartialEq,
    {
        let next = f(&self.get());
        self.set(next)
    }

    /// Call `f` with the current value right away, then on every notification.
    pub fn watch(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        f(&self.get());
        self.on_update(f)
    }

    /// Call `f` on every future notification, skipping the current value.
    pub fn on_update(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.watchers.add(Arc::new(f));
        Subscription::new(Arc::downgrade(&self.inner.watchers), id)
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// A reference that does not keep the cell alive.
    pub fn downgrade(&self) -> WeakCell<T> {
        WeakCell {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning reference to a `Cell`.
pub struct WeakCell<T> {
    inner: Weak<CellInner<T>>,
}

impl<T> WeakCell<T> {
    /// The cell, if any strong handle to it still exists.
    pub fn upgrade(&self) -> Option<Cell<T>> {
        self.inner.upgrade().map(|inner| Cell { inner })
    }
}

impl<T> Clone for WeakCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.inner.value.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Cell")
            .field("name", &self.inner.name)
            .field("value", &*value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn watch_fires_immediately_with_current_value() {
        let cell = Cell::new("counter", 1);
        let (seen, f) = recorder();
        let _sub = cell.watch(f);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn set_skips_equal_values() {
        let cell = Cell::new("counter", 1);
        let (seen, f) = recorder();
        let _sub = cell.on_update(f);

        assert!(!cell.set(1));
        assert!(cell.set(2));
        assert!(!cell.set(2));

        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn force_notifies_even_when_equal() {
        let cell = Cell::new("counter", 5);
        let (seen, f) = recorder();
        let _sub = cell.on_update(f);

        cell.force(5);
        cell.force(5);

        assert_eq!(*seen.lock().unwrap(), vec![5, 5]);
    }

    #[test]
    fn update_derives_from_current() {
        let cell = Cell::new("counter", 10);
        cell.update(|v| v + 1);
        assert_eq!(cell.get(), 11);
    }

    #[test]
    fn clones_share_value_and_watchers() {
        let cell = Cell::new("shared", String::from("a"));
        let other = cell.clone();
        let (seen, f) = recorder();
        let _sub = cell.on_update(f);

        other.set("b".to_string());

        assert_eq!(cell.get(), "b");
        assert_eq!(*seen.lock().unwrap(), vec!["b".to_string()]);
        assert_eq!(other.name(), "shared");
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let cell = Cell::new("counter", 0);
        let (seen, f) = recorder();
        let sub = cell.on_update(f);

        cell.set(1);
        drop(sub);
        cell.set(2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(cell.watcher_count(), 0);
    }

    #[test]
    fn weak_cell_does_not_keep_cell_alive() {
        let cell = Cell::new("counter", 1);
        let weak = cell.downgrade();
        assert_eq!(weak.upgrade().map(|c| c.get()), Some(1));

        drop(cell);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn notifications_follow_assignment_order_across_threads() {
        let cell = Cell::new("n", 0);
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);

        // Stalls the first delivery of 1 so another thread can assign 2 meanwhile.
        let _gate = cell.on_update(move |v: &i32| {
            if *v == 1 {
                entered_tx.lock().unwrap().send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
        });
        let (seen, f) = recorder();
        let _sub = cell.on_update(f);

        let first = {
            let cell = cell.clone();
            std::thread::spawn(move || cell.set(1))
        };
        entered_rx.recv().unwrap();

        let second = {
            let cell = cell.clone();
            std::thread::spawn(move || cell.set(2))
        };
        assert!(second.join().unwrap());
        assert_eq!(cell.get(), 2);

        release_tx.send(()).unwrap();
        assert!(first.join().unwrap());

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn assignment_inside_watcher_is_delivered_after_current_notification() {
        let cell = Cell::new("n", 0);
        let inner = cell.clone();
        let _clamp = cell.on_update(move |v: &i32| {
            if *v > 10 {
                inner.set(10);
            }
        });
        let (seen, f) = recorder();
        let _sub = cell.on_update(f);

        cell.set(15);

        assert_eq!(cell.get(), 10);
        assert_eq!(*seen.lock().unwrap(), vec![15, 10]);
    }

    #[test]
    fn delivery_resumes_after_a_watcher_panics() {
        let cell = Cell::new("n", 0);
        let _boom = cell.on_update(|v: &i32| {
            if *v == 1 {
                panic!("watcher failure");
            }
        });
        let (seen, f) = recorder();
        let _sub = cell.on_update(f);

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cell.set(1)));
        assert!(panicked.is_err());

        cell.set(2);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn nullable_cell_holds_none() {
        let cell: Cell<Option<u32>> = Cell::new("maybe", None);
        assert_eq!(cell.get(), None);
        cell.set(Some(3));
        assert_eq!(cell.get(), Some(3));
    }
}
