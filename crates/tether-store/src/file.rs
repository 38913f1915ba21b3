// ABOUTME: Asynchronous storage keeping one file per key inside a directory.
// ABOUTME: Writes are atomic (temp file, fsync, rename) so a crash never leaves a torn value.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use crate::area::KeyArea;
use crate::storage::{AsyncKeyValueStorage, StorageError};

const ITEM_EXTENSION: &str = "item";

/// Directory-backed storage. Construction performs no I/O; the directory is
/// created on first write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`. Bytes outside `[A-Za-z0-9_-]` are
    /// percent-escaped so any key maps to one flat, safe file name.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + ITEM_EXTENSION.len() + 1);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name.push('.');
        name.push_str(ITEM_EXTENSION);
        self.dir.join(name)
    }
}

#[async_trait]
impl AsyncKeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let final_path = self.path_for(key);
        // Each write stages into its own file; concurrent writes to one key
        // must never share a temp path.
        let tmp_path = final_path.with_extension(format!("{ITEM_EXTENSION}.{}.tmp", Ulid::new()));

        let result = write_then_rename(&tmp_path, &final_path, value).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result?;
        tracing::trace!(key, path = %final_path.display(), "wrote storage file");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn key_area(&self) -> KeyArea {
        KeyArea::location(format!("file:{}", self.dir.display()))
    }
}

async fn write_then_rename(tmp_path: &Path, final_path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(value.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp_path, final_path).await
}
