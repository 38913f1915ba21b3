// ABOUTME: The persistence engine: a driver task per attachment bridging cell updates and storage.
// ABOUTME: Rehydrates on attach, writes back every notification, and re-reads storage on pickup.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tether_core::{Subscription, WeakCell};
use tether_store::{KeyArea, StorageError, StorageHandle};
use tokio::sync::{mpsc, watch};

use crate::config::{MissPolicy, PersistConfig, WriteOrder};
use crate::error::{ErrorSlot, PersistError};

/// Lifecycle of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The driver task has not started yet.
    Uninitialized,
    /// The initial read is in flight. Cell updates are already written back
    /// and take precedence over whatever the read returns.
    Rehydrating,
    /// Writing back updates and serving pickups.
    Active,
    /// Detached from the cell; no further storage operations are issued.
    Detached,
}

enum Command<T> {
    Write(T),
    Pickup,
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadKind {
    Rehydrate,
    Pickup,
}

type WriteOp = BoxFuture<'static, (u64, Result<(), StorageError>)>;
type ReadOp<T> = BoxFuture<'static, (ReadKind, Result<Option<T>, StorageError>)>;

/// Counts operations that were requested but have not finished.
struct Pending {
    count: watch::Sender<usize>,
}

impl Pending {
    fn new() -> Self {
        Self {
            count: watch::channel(0).0,
        }
    }

    fn begin(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    fn end(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender is owned by `self`, so this only returns once idle.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Sending half of the driver's queue. Every accepted command is counted as
/// pending until the driver finishes with it.
struct Commands<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    pending: Arc<Pending>,
}

impl<T> Commands<T> {
    fn send(&self, command: Command<T>) -> bool {
        self.pending.begin();
        if self.tx.send(command).is_err() {
            self.pending.end();
            return false;
        }
        true
    }
}

impl<T> Clone for Commands<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

/// Attach a cell to storage.
///
/// Subscribes to the cell (and the pickup event, if any) right away, then
/// spawns a driver task that issues the initial read and serves write-backs
/// and pickups alongside it, so a read that never returns stalls only
/// itself. Failures never surface here; they go to the error handler.
///
/// Must be called from within a tokio runtime.
pub fn persist<T>(config: PersistConfig<T>) -> Attachment<T>
where
    T: Clone + Send + Sync + 'static,
{
    let key = config.resolved_key();
    let handle = config.adapter.handle(&key);
    let key_area = config.adapter.key_area();

    let errors = ErrorSlot::default();
    errors.replace(config.on_error);

    let pending = Arc::new(Pending::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let commands = Commands {
        tx,
        pending: Arc::clone(&pending),
    };
    let (phase_tx, phase_rx) = watch::channel(Phase::Uninitialized);

    let mut subscriptions = Vec::with_capacity(2);
    let on_update = commands.clone();
    subscriptions.push(config.cell.on_update(move |value: &T| {
        on_update.send(Command::Write(value.clone()));
    }));
    if let Some(event) = &config.pickup {
        let on_pickup = commands.clone();
        subscriptions.push(event.watch(move || {
            on_pickup.send(Command::Pickup);
        }));
    }

    // The initial read is pending until its result has been applied.
    pending.begin();

    let driver = Driver {
        key: key.clone(),
        cell: config.cell.downgrade(),
        default: config.cell.get(),
        handle: Arc::clone(&handle),
        errors: errors.clone(),
        miss_policy: config.miss_policy,
        write_order: config.write_order,
        commands: rx,
        pending,
        phase: phase_tx,
        subscriptions,
        superseded: false,
        next_seq: 0,
        newest_written: 0,
        write_busy: false,
        queued_writes: VecDeque::new(),
    };

    tracing::info!(
        key = %key,
        miss_policy = ?config.miss_policy,
        write_order = ?config.write_order,
        "attaching cell to storage"
    );
    tokio::spawn(driver.run());

    Attachment {
        key,
        key_area,
        handle,
        errors,
        commands,
        phase: phase_rx,
    }
}

/// Handle to a running attachment.
///
/// Dropping the handle does not detach: the cell keeps being persisted for
/// as long as it exists. Use `detach` to stop explicitly.
pub struct Attachment<T> {
    key: String,
    key_area: KeyArea,
    handle: Arc<dyn StorageHandle<T>>,
    errors: ErrorSlot,
    commands: Commands<T>,
    phase: watch::Receiver<Phase>,
}

impl<T> Clone for Attachment<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            key_area: self.key_area.clone(),
            handle: Arc::clone(&self.handle),
            errors: self.errors.clone(),
            commands: self.commands.clone(),
            phase: self.phase.clone(),
        }
    }
}

impl<T> Attachment<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The storage key this attachment reads and writes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Identity of the storage behind the adapter.
    pub fn key_area(&self) -> &KeyArea {
        &self.key_area
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Register the error handler, replacing any previous one. Applies to
    /// failures observed from now on.
    pub fn catch(&self, handler: impl Fn(&PersistError) + Send + Sync + 'static) -> &Self {
        self.errors.replace(Some(Arc::new(handler)));
        self
    }

    /// Remove the error handler; later failures are discarded.
    pub fn clear_catch(&self) -> &Self {
        self.errors.replace(None);
        self
    }

    pub fn has_error_handler(&self) -> bool {
        self.errors.is_set()
    }

    /// Re-read storage and force the result into the cell, exactly as the
    /// pickup event does. Returns false once detached.
    pub fn pickup(&self) -> bool {
        self.commands.send(Command::Pickup)
    }

    /// Read the current storage value without touching the cell. Failures
    /// go to the error handler and read as `None`.
    pub async fn read(&self) -> Option<T> {
        match self.handle.get().await {
            Ok(value) => value,
            Err(source) => {
                self.errors.route(PersistError::Read {
                    key: self.key.clone(),
                    source,
                });
                None
            }
        }
    }

    /// Wait until the initial read has been applied.
    pub async fn rehydrated(&self) {
        let mut rx = self.phase.clone();
        let _ = rx
            .wait_for(|phase| !matches!(phase, Phase::Uninitialized | Phase::Rehydrating))
            .await;
    }

    /// Wait until every queued and in-flight storage operation has finished.
    pub async fn settled(&self) {
        self.commands.pending.idle().await;
    }

    /// Stop persisting. Queued updates and in-flight writes complete first;
    /// reads that have not returned yet are dropped.
    pub async fn detach(&self) {
        self.commands.send(Command::Detach);
        let mut rx = self.phase.clone();
        let _ = rx.wait_for(|phase| *phase == Phase::Detached).await;
    }
}

impl<T> std::fmt::Debug for Attachment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("key", &self.key)
            .field("key_area", &self.key_area)
            .field("phase", &*self.phase.borrow())
            .finish()
    }
}

struct Driver<T> {
    key: String,
    cell: WeakCell<T>,
    /// Cell value at attach time; applied when a pickup finds the slot empty.
    default: T,
    handle: Arc<dyn StorageHandle<T>>,
    errors: ErrorSlot,
    miss_policy: MissPolicy,
    write_order: WriteOrder,
    commands: mpsc::UnboundedReceiver<Command<T>>,
    pending: Arc<Pending>,
    phase: watch::Sender<Phase>,
    subscriptions: Vec<Subscription>,
    /// A value newer than the initial read has reached the cell.
    superseded: bool,
    next_seq: u64,
    newest_written: u64,
    write_busy: bool,
    queued_writes: VecDeque<(u64, T)>,
}

impl<T> Driver<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(mut self) {
        let mut writes: FuturesUnordered<WriteOp> = FuturesUnordered::new();
        let mut reads: FuturesUnordered<ReadOp<T>> = FuturesUnordered::new();

        self.phase.send_replace(Phase::Rehydrating);
        reads.push(self.read_op(ReadKind::Rehydrate));

        loop {
            tokio::select! {
                // Queued updates are seen before a read result is applied.
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Write(value)) => {
                        self.superseded = true;
                        self.issue_write(value, &mut writes);
                    }
                    Some(Command::Pickup) => {
                        tracing::debug!(key = %self.key, "pickup requested, re-reading storage");
                        reads.push(self.read_op(ReadKind::Pickup));
                    }
                    Some(Command::Detach) => {
                        self.stop_listening();
                        self.pending.end();
                    }
                    None => break,
                },
                Some((seq, result)) = writes.next(), if !writes.is_empty() => {
                    self.complete_write(seq, result, &mut writes);
                }
                Some((kind, result)) = reads.next(), if !reads.is_empty() => {
                    self.complete_read(kind, result, &mut writes);
                }
            }
        }

        // Reads only feed a cell that is no longer followed; a hung one must
        // not hold up detaching.
        let abandoned = reads.len();
        drop(reads);
        for _ in 0..abandoned {
            self.pending.end();
        }
        if abandoned > 0 {
            tracing::debug!(key = %self.key, abandoned, "dropped unfinished reads on detach");
        }

        while let Some((seq, result)) = writes.next().await {
            self.complete_write(seq, result, &mut writes);
        }

        self.stop_listening();
        self.phase.send_replace(Phase::Detached);
        tracing::info!(key = %self.key, "detached cell from storage");
    }

    /// Unsubscribe from the cell and pickup event and refuse new commands.
    /// Commands already queued are still drained.
    fn stop_listening(&mut self) {
        self.subscriptions.clear();
        self.commands.close();
    }

    fn issue_write(&mut self, value: T, writes: &mut FuturesUnordered<WriteOp>) {
        self.next_seq += 1;
        let seq = self.next_seq;
        match self.write_order {
            WriteOrder::Concurrent => writes.push(self.write_op(seq, value)),
            WriteOrder::Sequential if self.write_busy => {
                self.queued_writes.push_back((seq, value));
            }
            WriteOrder::Sequential => {
                self.write_busy = true;
                writes.push(self.write_op(seq, value));
            }
        }
        tracing::trace!(key = %self.key, seq, "write issued");
    }

    fn write_op(&self, seq: u64, value: T) -> WriteOp {
        let handle = Arc::clone(&self.handle);
        async move {
            let result = handle.set(&value).await;
            (seq, result)
        }
        .boxed()
    }

    fn read_op(&self, kind: ReadKind) -> ReadOp<T> {
        let handle = Arc::clone(&self.handle);
        async move { (kind, handle.get().await) }.boxed()
    }

    fn complete_write(
        &mut self,
        seq: u64,
        result: Result<(), StorageError>,
        writes: &mut FuturesUnordered<WriteOp>,
    ) {
        match result {
            Ok(()) if seq < self.newest_written => {
                tracing::warn!(
                    key = %self.key,
                    seq,
                    newest = self.newest_written,
                    "write completed after a newer write; storage holds an older value"
                );
            }
            Ok(()) => {
                self.newest_written = seq;
                tracing::trace!(key = %self.key, seq, "write completed");
            }
            Err(source) => self.errors.route(PersistError::Write {
                key: self.key.clone(),
                source,
            }),
        }
        if self.write_order == WriteOrder::Sequential {
            match self.queued_writes.pop_front() {
                Some((next, value)) => writes.push(self.write_op(next, value)),
                None => self.write_busy = false,
            }
        }
        self.pending.end();
    }

    fn complete_read(
        &mut self,
        kind: ReadKind,
        result: Result<Option<T>, StorageError>,
        writes: &mut FuturesUnordered<WriteOp>,
    ) {
        match kind {
            ReadKind::Rehydrate => self.apply_rehydration(result, writes),
            ReadKind::Pickup => self.apply_pickup(result),
        }
        self.pending.end();
    }

    fn apply_rehydration(
        &mut self,
        result: Result<Option<T>, StorageError>,
        writes: &mut FuturesUnordered<WriteOp>,
    ) {
        match result {
            Err(source) => self.errors.route(PersistError::Read {
                key: self.key.clone(),
                source,
            }),
            Ok(_) if self.superseded => {
                tracing::debug!(key = %self.key, "cell changed while rehydrating, keeping the newer value");
            }
            Ok(Some(value)) => {
                tracing::debug!(key = %self.key, "rehydrating cell from storage");
                if let Some(cell) = self.cell.upgrade() {
                    cell.force(value);
                }
            }
            Ok(None) => {
                tracing::debug!(key = %self.key, "storage slot empty, keeping default");
                if self.miss_policy == MissPolicy::WriteDefault {
                    self.pending.begin();
                    let default = self.default.clone();
                    self.issue_write(default, writes);
                }
            }
        }
        self.phase.send_replace(Phase::Active);
    }

    fn apply_pickup(&mut self, result: Result<Option<T>, StorageError>) {
        let value = match result {
            Ok(Some(value)) => value,
            Ok(None) => self.default.clone(),
            Err(source) => {
                self.errors.route(PersistError::Read {
                    key: self.key.clone(),
                    source,
                });
                return;
            }
        };
        self.superseded = true;
        if let Some(cell) = self.cell.upgrade() {
            cell.force(value);
        }
    }
}
