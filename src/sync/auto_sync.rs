//! Auto-sync functionality for CLI commands.
//!
//! Runs a sync after write commands when `auto_sync` is enabled in the
//! configuration.

use crate::app::App;

/// Performs auto-sync if enabled and the server is reachable.
///
/// Failures are reported on stderr and otherwise ignored; local writes have
/// already been committed and will go out with the next sync.
pub async fn try_auto_sync(app: &App) {
    if !app.config.sync.auto_sync {
        return;
    }
    let Some(remote) = app.remote() else {
        return;
    };

    // Check server reachability first (fast fail)
    if !remote.check_server().await {
        eprintln!("Auto-sync: server unreachable, skipping");
        return;
    }

    match app.repo.try_sync().await {
        Ok(Some(report)) => tracing::info!("Auto-sync: {}", report),
        Ok(None) => tracing::debug!("Auto-sync: sync already running"),
        Err(e) if e.is_transient() => {
            eprintln!("Auto-sync: {} (changes kept for the next sync)", e)
        }
        Err(e) => eprintln!("Auto-sync: {}", e),
    }
}
