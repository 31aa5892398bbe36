// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource
//! management.

use crate::core::registry::SessionId;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Ensures the registry entry is always removed when a connection
/// handler's scope is exited, whatever the exit path was.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    session_id: SessionId,
    addr: SocketAddr,
}

impl ConnectionGuard {
    pub fn new(state: Arc<ServerState>, session_id: SessionId, addr: SocketAddr) -> Self {
        Self {
            state,
            session_id,
            addr,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        match self.state.registry.remove(self.session_id) {
            Some(info) if info.authenticated => {
                info!(
                    session_id = self.session_id,
                    addr = %self.addr,
                    user_id = %info.user_id,
                    username = %info.username,
                    "client disconnected"
                );
            }
            Some(_) => {
                debug!(
                    session_id = self.session_id,
                    addr = %self.addr,
                    "unauthenticated client disconnected"
                );
            }
            None => {
                debug!(session_id = self.session_id, "session already removed");
            }
        }
    }
}
