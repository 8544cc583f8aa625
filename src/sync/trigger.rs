//! Periodic sync trigger.

use std::future::Future;
use std::time::Duration;

use roster_core::{Repository, RepositoryError, SyncReport};
use tokio::time::MissedTickBehavior;

/// Outcome counts of a periodic run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub completed: usize,
    /// Ticks that found another sync already running.
    pub skipped: usize,
    pub failed: usize,
}

impl WatchStats {
    fn record(&mut self, result: &Result<Option<SyncReport>, RepositoryError>) {
        match result {
            Ok(Some(_)) => self.completed += 1,
            Ok(None) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Syncs every `period` until `shutdown` resolves.
///
/// The first sync runs immediately. Ticks coalesce with a sync already in
/// flight. If `shutdown` fires mid-sync the sync is cancelled and allowed to
/// stop at its next boundary before returning.
pub async fn run_periodic<S, F>(
    repo: &Repository,
    period: Duration,
    shutdown: S,
    mut on_result: F,
) -> WatchStats
where
    S: Future<Output = ()>,
    F: FnMut(&Result<Option<SyncReport>, RepositoryError>),
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let cancel = repo.cancel_handle();
    let mut stats = WatchStats::default();
    let mut stopping = false;

    while !stopping {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let sync = repo.try_sync();
        tokio::pin!(sync);

        // The sync is polled first so it claims the engine before a shutdown
        // can request cancellation.
        let result = tokio::select! {
            biased;
            result = &mut sync => result,
            _ = &mut shutdown => {
                tracing::info!("Stopping, cancelling sync in flight");
                stopping = true;
                cancel.cancel();
                sync.await
            }
        };

        stats.record(&result);
        on_result(&result);
    }

    stats
}
