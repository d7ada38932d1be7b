use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::storage::MemoryStore;

/// Start the background task that reclaims expired in-memory sessions.
///
/// Only the in-process store needs this; Redis expires keys on its own.
pub fn start_expiration_cleaner(store: Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_cleanup(&store).await;
        }
    })
}

/// Run one sweep on the blocking pool, returning how many entries were purged.
pub async fn run_cleanup(store: &Arc<MemoryStore>) -> usize {
    debug!("Running expiration cleanup");

    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.purge_expired()).await {
        Ok(count) => {
            if count > 0 {
                debug!(sessions_cleaned = count, "Expired sessions cleaned");
            }
            count
        }
        Err(e) => {
            error!(error = %e, "Expiration cleanup task panicked");
            0
        }
    }
}
