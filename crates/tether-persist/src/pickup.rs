// ABOUTME: Bridges foreign changes on a shared MemoryStorage into a pickup Event.
// ABOUTME: Lets an attachment follow writes made by other contexts without polling.

use tether_core::Event;
use tether_store::MemoryStorage;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Returns an event that fires whenever another context changes `key` in
/// `storage`, along with the task that drives it. Abort the task to stop.
///
/// If the change stream lags, the event fires once so the attachment
/// re-reads instead of missing an update.
pub fn pickup_on_foreign_change(
    storage: &MemoryStorage,
    key: impl Into<String>,
) -> (Event, JoinHandle<()>) {
    let key = key.into();
    let event = Event::new();
    let mut changes = storage.foreign_changes();
    let trigger = event.clone();

    let task = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) if change.key == key => {
                    tracing::debug!(key = %key, origin = %change.origin, "foreign change, firing pickup");
                    trigger.fire();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(key = %key, skipped, "change stream lagged, firing pickup to resync");
                    trigger.fire();
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!(key = %key, "storage closed, pickup bridge stopping");
    });

    (event, task)
}
