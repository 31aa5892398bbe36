// src/core/state.rs

//! Process-wide shared state, held behind one `Arc` for the lifetime of the
//! server.

use crate::config::Config;
use crate::core::registry::ClientRegistry;
use crate::store::Stores;
use tokio::sync::broadcast;

pub struct ServerState {
    pub config: Config,
    pub registry: ClientRegistry,
    pub stores: Stores,
    /// Fired once at shutdown; every connection task subscribes.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(config: Config, stores: Stores) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: ClientRegistry::new(),
            stores,
            shutdown_tx,
        }
    }
}
