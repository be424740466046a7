//! RoomSync CLI entry point

use clap::Parser;
use tracing::{error, info};

use roomsync_cli::{
    app::RoomSyncApp, cli::Cli, commands::CommandDispatcher, config::AppConfig, error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let mut config = load_configuration(&cli)?;

    // Apply command line overrides
    if let Some(room) = &cli.room {
        config.cli.room = room.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.identity.data_dir = Some(data_dir.into());
    }
    if let Some(device_id) = &cli.device_id {
        config.identity.device_id = Some(device_id.clone());
    }

    let app = match RoomSyncApp::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    // Execute the command
    if let Err(e) = CommandDispatcher::execute(cli.command, app).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    info!("RoomSync CLI exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        AppConfig::load_from_file(config_path)
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}
