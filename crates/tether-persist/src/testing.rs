// ABOUTME: Test doubles for exercising the persistence engine without real backends.
// ABOUTME: ScriptedStorage fails or holds operations on demand; Recorder captures cell notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tether_core::{Cell, Subscription};
use tether_store::{AsyncKeyValueStorage, KeyArea, StorageError};
use tokio::sync::{oneshot, watch};

struct Script {
    items: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    hold_writes: AtomicBool,
    held: Gates,
    held_count: watch::Sender<usize>,
    hold_reads: AtomicBool,
    held_reads: Gates,
    held_read_count: watch::Sender<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            items: Mutex::default(),
            writes: Mutex::default(),
            reads: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hold_writes: AtomicBool::new(false),
            held: Mutex::default(),
            held_count: watch::channel(0).0,
            hold_reads: AtomicBool::new(false),
            held_reads: Mutex::default(),
            held_read_count: watch::channel(0).0,
        }
    }
}

/// An in-memory async storage whose behavior tests can script.
///
/// - `fail_reads` / `fail_writes` make operations return
///   `StorageError::Unavailable`.
/// - `hold_writes` parks every subsequent write after it is recorded; each
///   parked write completes only when `release(n)` is called with its index,
///   letting tests choose the completion order.
/// - `hold_reads` does the same for reads, released with `release_read`. A
///   read that is never released behaves like a backend that hangs.
#[derive(Clone, Default)]
pub struct ScriptedStorage {
    script: Arc<Script>,
}

impl ScriptedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw value directly, as another context would.
    pub fn put_raw(&self, key: &str, raw: &str) {
        self.lock_items().insert(key.to_owned(), raw.to_owned());
    }

    /// The raw stored value for `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock_items().get(key).cloned()
    }

    /// Every write that reached the storage, in the order it was issued.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.script
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw values written to `key`, in issue order.
    pub fn written_values(&self, key: &str) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.script.reads.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.script.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.script.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn hold_writes(&self, hold: bool) {
        self.script.hold_writes.store(hold, Ordering::SeqCst);
    }

    pub fn hold_reads(&self, hold: bool) {
        self.script.hold_reads.store(hold, Ordering::SeqCst);
    }

    /// Let the `index`-th held write (0-based, in issue order) complete.
    /// Returns false if no such write is waiting.
    pub fn release(&self, index: usize) -> bool {
        release_from(&self.script.held, index)
    }

    /// Let the `index`-th held read (0-based, in issue order) complete.
    pub fn release_read(&self, index: usize) -> bool {
        release_from(&self.script.held_reads, index)
    }

    /// Wait until at least `count` writes have been parked.
    pub async fn wait_for_held(&self, count: usize) {
        let mut rx = self.script.held_count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|held| *held >= count).await;
    }

    /// Wait until at least `count` reads have been parked.
    pub async fn wait_for_held_reads(&self, count: usize) {
        let mut rx = self.script.held_read_count.subscribe();
        let _ = rx.wait_for(|held| *held >= count).await;
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.script.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AsyncKeyValueStorage for ScriptedStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        if self.script.hold_reads.load(Ordering::SeqCst) {
            park(&self.script.held_reads, &self.script.held_read_count).await;
        }
        if self.script.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("read of {key} refused")));
        }
        Ok(self.raw(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.script
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.to_owned(), value.to_owned()));

        if self.script.hold_writes.load(Ordering::SeqCst) {
            park(&self.script.held, &self.script.held_count).await;
        }

        if self.script.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("write of {key} refused")));
        }
        self.put_raw(key, value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock_items().remove(key);
        Ok(())
    }

    fn key_area(&self) -> KeyArea {
        KeyArea::shared(&self.script)
    }
}

type Gates = Mutex<Vec<Option<oneshot::Sender<()>>>>;

/// Register a gate and wait until it is released.
async fn park(gates: &Gates, count: &watch::Sender<usize>) {
    let (tx, rx) = oneshot::channel();
    {
        let mut gates = gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.push(Some(tx));
        count.send_replace(gates.len());
    }
    // A dropped sender means the script was torn down; finish anyway.
    let _ = rx.await;
}

fn release_from(gates: &Gates, index: usize) -> bool {
    let sender = gates
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get_mut(index)
        .and_then(Option::take);
    match sender {
        Some(tx) => tx.send(()).is_ok(),
        None => false,
    }
}

/// Collects every notification a cell delivers, starting with its current
/// value at the time of registration.
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
    _subscription: Subscription,
}

impl<T> Recorder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn watch(cell: &Cell<T>) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = cell.watch(move |value| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(value.clone());
        });
        Self {
            seen,
            _subscription: subscription,
        }
    }

    pub fn values(&self) -> Vec<T> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
