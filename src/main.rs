//! Proximity Push - location-aware push notification fan-out
//!
//! Resolves the recipients of social and activity events (direct messages,
//! friend requests, joins, new activities nearby, founder broadcasts),
//! builds platform-decorated payloads and fans them out through FCM in
//! bounded batches, returning a per-call delivery report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod directory;
mod engine;
mod error;
mod events;
mod geo;
mod metrics;
mod push;
mod server;
mod shutdown;

use config::AppConfig;
use directory::SnapshotDirectory;
use engine::DispatchEngine;
use events::NotificationEvent;
use metrics::Metrics;
use push::fcm::FcmProvider;
use push::provider::PushProvider;
use server::HttpServer;
use shutdown::ShutdownHandler;

/// Proximity Push - location-aware push notification fan-out
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    config: String,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Dispatch a single event from a JSON file and print the report
    Send {
        /// Path to a JSON-encoded notification event
        event: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if Path::new(&args.config).exists() {
        AppConfig::load(&args.config)
            .with_context(|| format!("Failed to load config from {}", args.config))?
    } else {
        AppConfig::from_env().context("Failed to load config from environment")?
    };

    if let Some(Command::CheckConfig) = args.command {
        println!("Configuration OK: {}", args.config);
        return Ok(());
    }

    init_logging(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %args.config,
        "Starting Proximity Push"
    );

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
        metrics.init_server_info(env!("CARGO_PKG_VERSION"));
        Some(metrics)
    } else {
        debug!("Metrics disabled");
        None
    };

    let provider = FcmProvider::new(
        config.fcm.clone(),
        config.payload.clone(),
        config.dispatch.max_concurrency,
        metrics.clone(),
    )
    .await
    .context("Failed to initialize FCM provider")?;

    if provider.is_configured() {
        info!("FCM provider initialized");
    } else if config.fcm.enabled {
        warn!("FCM enabled but not fully configured - notifications will not be sent");
    } else {
        warn!("FCM disabled - notifications will not be sent");
    }

    let directory = SnapshotDirectory::load(&config.directory.snapshot_path)
        .await
        .context("Failed to load directory snapshot")?;

    let engine = Arc::new(DispatchEngine::new(
        Arc::new(directory),
        Arc::new(provider),
        config.dispatch.clone(),
        metrics.clone(),
    ));

    if let Some(Command::Send { event }) = args.command {
        return send_one(&engine, &event).await;
    }

    let shutdown = ShutdownHandler::new();

    let http_server = HttpServer::new(config.server.clone(), engine, metrics);
    let server_shutdown = shutdown.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run(server_shutdown).await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("Proximity Push running");

    shutdown.wait_for_signal().await;

    info!("Initiating graceful shutdown");

    // The server finishes in-flight dispatches before its task completes.
    shutdown::drain(config.server.shutdown_timeout(), vec![server_handle]).await;

    info!("Proximity Push stopped");
    Ok(())
}

/// Dispatch one event read from `path` and print the report as JSON.
async fn send_one(engine: &DispatchEngine, path: &Path) -> Result<()> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read event from {}", path.display()))?;
    let event: NotificationEvent =
        serde_json::from_str(&data).context("Failed to parse notification event")?;

    let report = engine.dispatch(&event).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Initialize the tracing subscriber based on configuration.
fn init_logging(config: &config::LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
        "off" => {}
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()?;
        }
    }

    Ok(())
}
