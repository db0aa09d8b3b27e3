mod banner;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use turnstile_config::{AppConfig, ConfigLoader};
use turnstile_db::{AttendanceStore, MigrationRunner};
use turnstile_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "turnstile", version, about = "Offline QR attendance and check-in system")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "turnstile.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (the default when no subcommand is given).
    Serve,
    /// Apply pending schema migrations and exit.
    Migrate,
    /// Show the current schema version and migration history.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            banner::print_banner(&config, &data_dir(&config));
            GatewayServer::new(config).run().await?;
        }
        Command::Migrate => {
            let store = open_store(&config)?;
            let runner = MigrationRunner::new(&store);
            let applied = runner.apply_all_pending()?;
            println!(
                "applied {applied} migration(s), schema is at v{}",
                runner.current_version()?
            );
        }
        Command::Version => {
            let store = open_store(&config)?;
            let status = MigrationRunner::new(&store).status()?;
            println!("current version: {}", status.current_version);
            println!("pending migrations: {}", status.pending.len());
            for pending in &status.pending {
                println!("  - {}: {}", pending.version, pending.description);
            }
            println!("history:");
            for applied in &status.history {
                println!(
                    "  {}  {}  {}",
                    applied.applied_at.format("%Y-%m-%d %H:%M"),
                    applied.version,
                    applied.description
                );
            }
        }
    }

    Ok(())
}

fn data_dir(config: &AppConfig) -> PathBuf {
    config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn open_store(config: &AppConfig) -> Result<AttendanceStore> {
    let dir = data_dir(config);
    std::fs::create_dir_all(&dir)?;
    Ok(AttendanceStore::open(&dir.join("turnstile.db"))?)
}
