//! Sync CLI commands for synchronizing with the server.

use std::time::Duration;

use chrono::Local;
use clap::{Args, Subcommand};
use roster_core::RepositoryError;
use tokio::sync::broadcast;

use crate::app::App;
use crate::sync::run_periodic;

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, pending changes and server status
    Status,

    /// Only push local changes to the server
    Upload,

    /// Only pull the server's users into the local store
    Download,

    /// Sync periodically until interrupted (Ctrl-C)
    Watch {
        /// Seconds between syncs (default: sync.interval_secs from config)
        #[arg(long, short)]
        interval: Option<u64>,
    },
}

impl SyncCommand {
    pub async fn run(&self, app: &App) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(app).await,
            Some(SyncSubcommand::Status) => self.status(app).await,
            Some(SyncSubcommand::Upload) => {
                ensure_configured(app)?;
                let message = app.repo.upload_pending_changes().await?;
                println!("{}", message);
                Ok(())
            }
            Some(SyncSubcommand::Download) => {
                ensure_configured(app)?;
                let message = app.repo.sync_from_server().await?;
                println!("{}", message);
                Ok(())
            }
            Some(SyncSubcommand::Watch { interval }) => self.watch(app, *interval).await,
        }
    }

    async fn sync(&self, app: &App) -> Result<(), SyncCommandError> {
        ensure_configured(app)?;

        let mut notifications = app.repo.subscribe_notifications();
        let result = app.repo.sync().await;
        print_pending(&mut notifications);

        result?;
        println!("Sync complete.");
        Ok(())
    }

    async fn watch(&self, app: &App, interval: Option<u64>) -> Result<(), SyncCommandError> {
        ensure_configured(app)?;

        let secs = interval.unwrap_or(app.config.sync.interval_secs).max(1);
        println!("Syncing every {}s. Press Ctrl-C to stop.", secs);

        let mut notifications = app.repo.subscribe_notifications();
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        let stats = run_periodic(&app.repo, Duration::from_secs(secs), shutdown, |_| {
            print_pending(&mut notifications);
        })
        .await;

        println!();
        println!(
            "Stopped after {} sync(s): {} failed, {} skipped.",
            stats.completed + stats.failed,
            stats.failed,
            stats.skipped
        );
        Ok(())
    }

    async fn status(&self, app: &App) -> Result<(), SyncCommandError> {
        let config = &app.config;

        println!("Sync Configuration");
        println!("==================");
        println!();

        let counts = app.repo.pending_counts().await?;

        let Some(remote) = app.remote() else {
            println!("Status: Not configured");
            println!();
            println!("Pending: {} change(s), {} deletion(s)", counts.dirty, counts.tombstones);
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  remote:");
            println!("    base_url: \"http://localhost:3000\"");
            println!();
            println!("Or set environment variable:");
            println!("  ROSTER_REMOTE_URL");
            return Ok(());
        };

        println!("Server:     {}", remote.base_url());
        println!("Collection: {}", remote.collection());
        println!(
            "Auto-sync:  {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!("Interval:   {}s", config.sync.interval_secs);
        println!();
        println!("Pending: {} change(s), {} deletion(s)", counts.dirty, counts.tombstones);
        println!();

        print!("Server status: ");
        if remote.check_server().await {
            println!("✓ reachable");
        } else {
            println!("✗ unreachable");
        }

        Ok(())
    }
}

fn ensure_configured(app: &App) -> Result<(), SyncCommandError> {
    if app.remote().is_none() {
        return Err(SyncCommandError::NotConfigured);
    }
    Ok(())
}

/// Prints every status message received so far.
fn print_pending(rx: &mut broadcast::Receiver<String>) {
    loop {
        match rx.try_recv() {
            Ok(message) => println!("[{}] {}", Local::now().format("%H:%M:%S"), message),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::debug!("Dropped {} status message(s)", n);
            }
            Err(_) => break,
        }
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    NotConfigured,
    Failed(RepositoryError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::NotConfigured => write!(
                f,
                "Sync not configured. Add remote.base_url to config or set ROSTER_REMOTE_URL."
            ),
            SyncCommandError::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {}

impl From<RepositoryError> for SyncCommandError {
    fn from(e: RepositoryError) -> Self {
        SyncCommandError::Failed(e)
    }
}
