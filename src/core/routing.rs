// src/core/routing.rs

//! Routing primitives exposed to handlers: send to one session, send to one
//! user, broadcast to everyone. Handlers receive a `ServerHandle` and
//! nothing else; they never touch sockets or the accept loop.
//!
//! Every primitive follows the collect-then-send rule: the registry lock is
//! used only to resolve targets, and the actual enqueue happens after it is
//! released. The connection task that owns each socket performs the write,
//! so a slow or dead peer can never stall a handler.

use crate::core::protocol::{MessageKind, Packet};
use crate::core::registry::{ClientInfo, OnlineUser, SessionId};
use crate::core::state::ServerState;
use crate::store::Stores;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// The capability handlers program against.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn stores(&self) -> &Stores {
        &self.state.stores
    }

    /// Enqueues one frame on a session's outbox. A missing session or a
    /// closing connection makes this a silent no-op; per-recipient failures
    /// never propagate to the caller.
    pub fn send_to_session(&self, session_id: SessionId, kind: MessageKind, payload: Bytes) {
        let Some(outbox) = self.state.registry.outbox(session_id) else {
            debug!(session_id, ?kind, "send to unknown session dropped");
            return;
        };
        if outbox.send(Packet::new(kind, payload)).is_err() {
            debug!(session_id, ?kind, "send to closing session dropped");
        }
    }

    /// Serializes `body` and sends it to one session.
    pub fn send_json<T: Serialize>(&self, session_id: SessionId, kind: MessageKind, body: &T) {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.send_to_session(session_id, kind, Bytes::from(bytes)),
            Err(e) => error!(session_id, ?kind, "payload serialization failed: {e}"),
        }
    }

    /// Resolves a user to at most one session and sends. Returns whether
    /// the user was online; offline delivery is a logged no-op.
    pub fn send_to_user(&self, user_id: &str, kind: MessageKind, payload: Bytes) -> bool {
        match self.state.registry.find_session_by_user(user_id) {
            Some(session_id) => {
                self.send_to_session(session_id, kind, payload);
                true
            }
            None => {
                info!(user_id, ?kind, "user offline, frame dropped");
                false
            }
        }
    }

    pub fn send_json_to_user<T: Serialize>(
        &self,
        user_id: &str,
        kind: MessageKind,
        body: &T,
    ) -> bool {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.send_to_user(user_id, kind, Bytes::from(bytes)),
            Err(e) => {
                error!(user_id, ?kind, "payload serialization failed: {e}");
                false
            }
        }
    }

    /// Sends one frame to every authenticated session, optionally excluding
    /// one (the sender). The payload is encoded once and shared.
    pub fn broadcast(&self, kind: MessageKind, payload: Bytes, exclude: Option<SessionId>) {
        let targets = self.state.registry.snapshot_authenticated(exclude);
        let count = targets.len();
        for session_id in targets {
            self.send_to_session(session_id, kind, payload.clone());
        }
        info!(?kind, recipients = count, "broadcast");
    }

    pub fn broadcast_json<T: Serialize>(
        &self,
        kind: MessageKind,
        body: &T,
        exclude: Option<SessionId>,
    ) {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.broadcast(kind, Bytes::from(bytes), exclude),
            Err(e) => error!(?kind, "payload serialization failed: {e}"),
        }
    }

    /// Fires the session's kill switch; the owning task tears the
    /// connection down. Closing an already-closed session is a no-op.
    pub fn close_session(&self, session_id: SessionId) {
        if let Some(kill) = self.state.registry.kill_switch(session_id) {
            let _ = kill.send(());
        }
    }

    pub fn client_info(&self, session_id: SessionId) -> Option<ClientInfo> {
        self.state.registry.get_info(session_id)
    }

    /// Identity of a session that has completed login/register; `None` for
    /// unauthenticated or vanished sessions.
    pub fn authenticated_client(&self, session_id: SessionId) -> Option<ClientInfo> {
        self.state
            .registry
            .get_info(session_id)
            .filter(|info| info.authenticated)
    }

    pub fn is_authenticated(&self, session_id: SessionId) -> bool {
        self.state.registry.is_authenticated(session_id)
    }

    pub fn mark_authenticated(
        &self,
        session_id: SessionId,
        user_id: &str,
        username: &str,
        nickname: &str,
    ) {
        self.state
            .registry
            .mark_authenticated(session_id, user_id, username, nickname);
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.state.registry.is_user_online(user_id)
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        self.state.registry.snapshot_online_user_ids()
    }

    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.state.registry.snapshot_online_users()
    }
}
