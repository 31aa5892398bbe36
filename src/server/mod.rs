// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

pub mod connection_loop;
pub mod initialization;

pub use initialization::ServerContext;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Connect the store and bind the listener.
    let ctx = initialization::setup(config).await?;

    // 2. Accept connections until shutdown.
    connection_loop::run(ctx).await;

    Ok(())
}
