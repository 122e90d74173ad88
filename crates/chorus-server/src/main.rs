//! # Chorus Server
//!
//! Realtime chat fan-out server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chorus
//!
//! # Run with custom config
//! chorus --config /path/to/chorus.toml
//!
//! # Run with environment variables
//! CHORUS_PORT=8080 CHORUS_HOST=0.0.0.0 chorus
//! ```

mod config;
mod error;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Realtime chat fan-out server.
#[derive(Debug, Parser)]
#[command(name = "chorus", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to, overriding the configuration.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overriding the configuration.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorus=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!(
        storage = ?config.storage.backend,
        "Starting Chorus server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
