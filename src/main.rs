// src/main.rs

//! The main entry point for the ferrochat server.

use anyhow::Result;
use ferrochat::config::Config;
use ferrochat::server;
use std::env;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging first, so even startup failures are visible. RUST_LOG
    // overrides the default level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_ansi(true)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = match Config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("usage: ferrochat [port]");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };

    info!(port = config.port, "starting ferrochat server");
    if let Err(e) = server::run(config).await {
        error!("server startup failed: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
