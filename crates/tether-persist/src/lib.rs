// ABOUTME: Persistence engine keeping a tether Cell and a storage slot eventually consistent.
// ABOUTME: Handles rehydration, write-back on change, fail-open error routing, and pickup re-reads.

pub mod config;
pub mod engine;
pub mod error;
pub mod pickup;
pub mod testing;

pub use config::{MissPolicy, PersistConfig, WriteOrder};
pub use engine::{Attachment, Phase, persist};
pub use error::{ErrorHandler, PersistError};
pub use pickup::pickup_on_foreign_change;
