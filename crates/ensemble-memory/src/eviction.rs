use crate::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Starts a background loop that evicts expired entries on an interval.
///
/// Returns the [`tokio::task::JoinHandle`] so the caller can abort it on
/// shutdown.
pub fn spawn_eviction(
    store: Arc<dyn MemoryStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match store.evict_expired().await {
                Ok(0) => {}
                Ok(evicted) => debug!(evicted, "memory eviction sweep"),
                Err(e) => warn!(error = %e, "memory eviction sweep failed"),
            }
        }
    })
}
