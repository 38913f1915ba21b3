// ABOUTME: Error type for persistence failures and the single-slot handler they are routed to.
// ABOUTME: Without a registered handler errors are discarded so the cell keeps working in memory.

use std::sync::{Arc, PoisonError, RwLock};

use tether_store::StorageError;
use thiserror::Error;

/// A storage failure observed by the engine.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },
}

impl PersistError {
    pub fn key(&self) -> &str {
        match self {
            PersistError::Read { key, .. } | PersistError::Write { key, .. } => key,
        }
    }

    pub fn storage_error(&self) -> &StorageError {
        match self {
            PersistError::Read { source, .. } | PersistError::Write { source, .. } => source,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, PersistError::Read { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self, PersistError::Write { .. })
    }
}

/// Callback receiving persistence errors.
pub type ErrorHandler = Arc<dyn Fn(&PersistError) + Send + Sync>;

/// Holds at most one handler; a later registration replaces the earlier one.
#[derive(Clone, Default)]
pub(crate) struct ErrorSlot {
    handler: Arc<RwLock<Option<ErrorHandler>>>,
}

impl ErrorSlot {
    pub(crate) fn replace(&self, handler: Option<ErrorHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Hand `error` to the current handler, or drop it when none is set.
    pub(crate) fn route(&self, error: PersistError) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(&error),
            None => tracing::debug!(key = error.key(), error = %error, "discarding unhandled storage error"),
        }
    }
}
