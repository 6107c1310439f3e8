//! Main entry point for the application.
//!
//! This module initializes logging, loads environment variables and configuration,
//! resumes the tasks interrupted by a previous run and serves the HTTP API.

use clap::Parser;
use taskpilot::config::{load_app_config, AppConfig};
use taskpilot::event::EventBus;
use taskpilot::{api, build_coordinator, cli, utils};
use tracing::{error, info, warn};

/// Main entry point that initializes and runs the application.
///
/// # Initialization steps:
/// 1. Parse CLI arguments
/// 2. Initialize logging system
/// 3. Load environment variables and configuration
/// 4. Build the coordinator and recover interrupted tasks
/// 5. Serve the API until it stops
#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Failed to load .env file: {}", e);
    }

    let cli = cli::Cli::parse();
    utils::init_logging(&cli.logging_level, cli.log_to_file);

    let mut config = match &cli.config {
        Some(path) => match load_app_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("No configuration file given, using defaults");
            AppConfig::default()
        }
    };
    if let Some(path) = cli.database_path {
        config.storage.path = path;
    }
    if let Some(port) = cli.api_port {
        config.server.port = port;
    }

    let bus = EventBus::new();
    utils::spawn_event_logger(bus.subscribe());

    let coordinator = match build_coordinator(&config, &bus) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    match coordinator.recover().await {
        Ok(0) => {}
        Ok(resumed) => info!("Resumed {} interrupted tasks", resumed),
        Err(e) => warn!("Recovery skipped: {}", e),
    }

    info!("Starting API server on port {}", config.server.port);
    if let Err(e) = api::server::launch_server(coordinator, config.server.port).await {
        error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}
