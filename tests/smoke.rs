// ABOUTME: End-to-end smoke tests for tether across real backends.
// ABOUTME: Covers restart survival on SQLite and files, custom codecs, and cross-context pickup.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::{Cell, CodecError, FnCodec};
use tether_persist::{MissPolicy, Phase, PersistConfig, persist, pickup_on_foreign_change};
use tether_store::{
    AsyncStorageAdapter, Blocking, FileStorage, KeyValueStorage, MemoryStorage, SqliteStorage,
    StorageError, SyncStorageAdapter,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Settings {
    theme: String,
    font_size: u32,
    recent: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            font_size: 12,
            recent: Vec::new(),
        }
    }
}

#[tokio::test]
async fn sqlite_state_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("state").join("tether.db");

    // First run: start from the default and edit.
    {
        let storage = SqliteStorage::open(&db).unwrap();
        let cell = Cell::new("settings", Settings::default());
        let attachment = persist(PersistConfig::new(
            &cell,
            AsyncStorageAdapter::new(Blocking::new(storage)),
        ));
        attachment.settled().await;
        assert_eq!(cell.get(), Settings::default());

        cell.update(|s| Settings {
            theme: "dark".to_string(),
            recent: vec!["notes.md".to_string()],
            ..s.clone()
        });
        attachment.detach().await;
        assert_eq!(attachment.phase(), Phase::Detached);
    }

    // Second run: a fresh cell rehydrates from disk.
    let storage = SqliteStorage::open(&db).unwrap();
    let cell = Cell::new("settings", Settings::default());
    let attachment = persist(PersistConfig::new(
        &cell,
        AsyncStorageAdapter::new(Blocking::new(storage.clone())),
    ));
    attachment.settled().await;

    assert_eq!(cell.get().theme, "dark");
    assert_eq!(cell.get().recent, vec!["notes.md".to_string()]);
    let raw = storage.get_item("settings").unwrap().unwrap();
    let decoded: Settings = serde_json::from_str(&raw).unwrap();
    assert_eq!(decoded, cell.get());
}

#[tokio::test]
async fn file_backend_writes_default_and_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let items = dir.path().join("items");

    let cell = Cell::new("launches", 0u32);
    let attachment = persist(
        PersistConfig::new(&cell, AsyncStorageAdapter::new(FileStorage::new(&items)))
            .miss_policy(MissPolicy::WriteDefault),
    );
    attachment.settled().await;
    let path = FileStorage::new(&items).path_for("launches");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");

    cell.update(|n| n + 1);
    attachment.detach().await;

    let reopened = Cell::new("launches", 0u32);
    let attachment = persist(PersistConfig::new(
        &reopened,
        AsyncStorageAdapter::new(FileStorage::new(&items)),
    ));
    attachment.settled().await;
    assert_eq!(reopened.get(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_backend_accepts_a_burst_of_concurrent_writes() {
    let dir = tempfile::TempDir::new().unwrap();
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);

    let cell = Cell::new("n", 0u32);
    let attachment = persist(
        PersistConfig::new(&cell, AsyncStorageAdapter::new(FileStorage::new(dir.path())))
            .on_error(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    );
    attachment.settled().await;

    for n in 1..=300u32 {
        cell.set(n * 1000 + n);
    }
    attachment.settled().await;

    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(cell.get(), 300_300);
    let stored: u32 = attachment.read().await.unwrap();
    assert_eq!(stored % 1001, 0, "stored value must be one of the written ones");
}

#[tokio::test]
async fn custom_codec_controls_the_stored_form() {
    let storage = MemoryStorage::new();
    let codec = FnCodec::new(
        |flag: &bool| -> Result<String, CodecError> { Ok(if *flag { "on" } else { "off" }.to_string()) },
        |raw: &str| -> Result<bool, CodecError> {
            match raw {
                "on" => Ok(true),
                "off" => Ok(false),
                other => Err(CodecError::Custom(format!("not a switch: {other}"))),
            }
        },
    );
    storage.set_item("wifi", "on").unwrap();

    let cell = Cell::new("wifi", false);
    let attachment = persist(PersistConfig::new(
        &cell,
        SyncStorageAdapter::new(storage.clone()).with_codec(codec),
    ));
    attachment.settled().await;
    assert!(cell.get());

    cell.set(false);
    attachment.settled().await;
    assert_eq!(storage.get_item("wifi").unwrap().as_deref(), Some("off"));
}

#[tokio::test]
async fn quota_failure_is_reported_and_cell_keeps_value() {
    let storage = MemoryStorage::with_quota(16);
    let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);

    let cell = Cell::new("log", String::new());
    let attachment = persist(
        PersistConfig::new(&cell, SyncStorageAdapter::new(storage.clone())).on_error(move |err| {
            let quota = matches!(err.storage_error(), StorageError::QuotaExceeded { .. });
            sink.lock().unwrap().push((err.is_write(), quota));
        }),
    );
    attachment.settled().await;

    cell.set("far too long to fit in sixteen bytes".to_string());
    attachment.settled().await;

    assert_eq!(*errors.lock().unwrap(), vec![(true, true)]);
    assert_eq!(cell.get(), "far too long to fit in sixteen bytes");
    assert_eq!(storage.get_item("log").unwrap(), None);
}

#[tokio::test]
async fn two_contexts_stay_in_sync_through_pickup() {
    let first = MemoryStorage::new();
    let second = first.open_context();

    let (pickup_a, task_a) = pickup_on_foreign_change(&first, "count");
    let (pickup_b, task_b) = pickup_on_foreign_change(&second, "count");

    let cell_a = Cell::new("count", 0i64);
    let cell_b = Cell::new("count", 0i64);
    let a = persist(PersistConfig::new(&cell_a, SyncStorageAdapter::new(first)).pickup(&pickup_a));
    let b = persist(PersistConfig::new(&cell_b, SyncStorageAdapter::new(second)).pickup(&pickup_b));
    a.settled().await;
    b.settled().await;

    cell_a.set(3);
    wait_for(&cell_b, 3).await;

    cell_b.set(4);
    wait_for(&cell_a, 4).await;

    task_a.abort();
    task_b.abort();
}

async fn wait_for(cell: &Cell<i64>, expected: i64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while cell.get() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("cell never reached {expected}, stuck at {}", cell.get()));
}
