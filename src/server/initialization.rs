// src/server/initialization.rs

//! Startup: connect the store, bind the listener, build the shared state.
//! Any failure here aborts the process before a single client is accepted.

use crate::config::Config;
use crate::core::state::ServerState;
use crate::store::{MySqlStore, Stores};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Everything the accept loop needs.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub listener: TcpListener,
}

pub async fn setup(config: Config) -> Result<ServerContext> {
    let store = MySqlStore::connect(&config.db)
        .await
        .context("database initialization failed")?;
    let stores = Stores::from_backend(store);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!(port = config.port, "server listening");

    let state = Arc::new(ServerState::new(config, stores));
    Ok(ServerContext { state, listener })
}
