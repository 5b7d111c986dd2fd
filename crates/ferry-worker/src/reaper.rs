use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use ferry_db::StateStore;

/// Periodically release claims whose lease expired
///
/// Returns `None` when `interval` is zero.
pub fn spawn_claim_reaper(
    store: StateStore,
    interval: Duration,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.records().release_stale_claims().await {
                        tracing::error!(error = %e, "Stale claim reaper failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::debug!("Stale claim reaper stopped");
    }))
}
