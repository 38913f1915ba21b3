// ABOUTME: Entry point for the tether demo binary.
// ABOUTME: Attaches a counter cell to the configured storage and applies one CLI command to it.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tether_core::Cell;
use tether_persist::{PersistConfig, persist};
use tether_store::{
    AsyncStorageAdapter, Blocking, FileStorage, MemoryStorage, SqliteStorage, StorageAdapter,
    SyncStorageAdapter,
};

use crate::config::{Backend, TetherConfig};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "tether=debug,tether_persist=debug";

#[derive(Debug, Parser)]
#[command(name = "tether", about = "A counter that survives restarts")]
struct Cli {
    /// Storage key holding the counter.
    #[arg(long, default_value = "counter")]
    key: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current value.
    Show,
    /// Add to the counter.
    Increment {
        #[arg(default_value_t = 1)]
        by: i64,
    },
    /// Overwrite the counter.
    Set { value: i64 },
    /// Set the counter back to zero.
    Reset,
}

fn open_adapter(config: &TetherConfig) -> anyhow::Result<Arc<dyn StorageAdapter<i64>>> {
    let adapter: Arc<dyn StorageAdapter<i64>> = match config.backend {
        Backend::Sqlite => {
            let path = config.database_path();
            let storage = SqliteStorage::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            Arc::new(AsyncStorageAdapter::new(Blocking::new(storage)))
        }
        Backend::File => Arc::new(AsyncStorageAdapter::new(FileStorage::new(config.items_dir()))),
        Backend::Memory => Arc::new(SyncStorageAdapter::new(MemoryStorage::new())),
    };
    Ok(adapter)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = TetherConfig::from_env()?;
    tracing::info!(
        home = %config.home.display(),
        backend = ?config.backend,
        "tether starting up"
    );

    let cell = Cell::new(cli.key.clone(), 0i64);
    let attachment = persist(
        PersistConfig::with_shared_adapter(&cell, open_adapter(&config)?)
            .miss_policy(config.miss_policy)
            .write_order(config.write_order)
            .on_error(|err| tracing::error!(key = err.key(), error = %err, "storage failure")),
    );
    attachment.settled().await;

    match cli.command.unwrap_or(Command::Show) {
        Command::Show => {}
        Command::Increment { by } => {
            cell.update(|n| n.saturating_add(by));
        }
        Command::Set { value } => {
            cell.set(value);
        }
        Command::Reset => {
            cell.set(0);
        }
    }

    attachment.detach().await;
    println!("{} = {}", attachment.key(), cell.get());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_filter_is_debug_for_tether_crates() {
        assert_eq!(DEFAULT_LOG_FILTER, "tether=debug,tether_persist=debug");
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn cli_defaults_to_counter_key() {
        let cli = Cli::try_parse_from(["tether", "increment", "3"]).unwrap();
        assert_eq!(cli.key, "counter");
        assert!(matches!(cli.command, Some(Command::Increment { by: 3 })));
    }
}
