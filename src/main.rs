//! Server terminator binary.
//!
//! Serves the built-in routes on every configured listener and, on SIGINT or
//! SIGTERM, terminates all of them within the configured shutdown timeout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use server_terminator::config::{load_config, AppConfig};
use server_terminator::http::routes;
use server_terminator::lifecycle::{shutdown_all, signals, startup, ConnectionRegistry};
use server_terminator::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "server-terminator")]
#[command(about = "HTTP/HTTPS server with graceful, time-bounded shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
    }

    tracing::info!(
        listeners = config.listeners.len(),
        shutdown_timeout_ms = config.shutdown.timeout_ms,
        "server-terminator v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = ConnectionRegistry::new();
    let servers = match startup::start_servers(&config.listeners, routes::router(), &registry).await {
        Ok(servers) => servers,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    signals::shutdown_signal().await;

    match shutdown_all(&servers, &registry, &config.shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Shutdown failed");
            ExitCode::FAILURE
        }
    }
}
