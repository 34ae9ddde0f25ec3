pub mod classify;
pub mod config;
pub mod effectiveness;
pub mod error;
pub mod loader;
pub mod registry;
pub mod schema;
pub mod server;
pub mod session;
pub mod types;
pub mod view;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the drill dashboard API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load the configured layers and print a summary
    Inspect {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;

            let mut dashboard = session::Session::new(&app_config);

            // Restore the previous session snapshot first so persisted
            // column choices guide the load; counters bind only if the
            // loaded identity set matches the persisted one.
            match session::Snapshot::load_from_file(&app_config.session.snapshot_path) {
                Ok(snapshot) => {
                    info!("restoring session snapshot");
                    snapshot.restore(&mut dashboard);
                }
                Err(e) => info!("no session snapshot restored: {e}"),
            }
            dashboard.load_configured_layers(&app_config);

            server::start_server(app_config, dashboard).await?;
        }
        Commands::Inspect { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            server::inspect(&app_config)?;
        }
    }

    Ok(())
}
