use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod commands;
mod config;
mod db;
mod sync;

use app::App;
use commands::{ConfigCommand, SyncCommand, UserCommand};
use config::Config;
use sync::try_auto_sync;

#[derive(Parser)]
#[command(name = "roster")]
#[command(version)]
#[command(about = "An offline-first user roster that syncs with a REST service", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User(UserCommand),

    /// Sync with the remote server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roster=warn,roster_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::User(cmd)) => {
            let app = App::open(config).await?;
            cmd.run(&app.repo).await?;

            // Auto-sync AFTER write commands (only if command succeeded)
            if cmd.command.is_write() {
                try_auto_sync(&app).await;
            }
        }
        Some(Commands::Sync(cmd)) => {
            let app = App::open(config).await?;
            cmd.run(&app).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
