// src/core/registry.rs

//! The connection registry: the single source of truth for which sessions
//! exist and which users are online.
//!
//! One mutex guards the whole map. Lock discipline: the lock is only ever
//! held to read or mutate the map, never across a socket write or any
//! await point. Routing collects what it needs under the lock, releases it,
//! then sends.

use crate::core::protocol::Packet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

pub type SessionId = u64;

/// Per-connection bookkeeping. The outbox feeds the connection task that
/// owns the socket; the kill switch tears the task down.
struct ClientEntry {
    addr: SocketAddr,
    outbox: mpsc::UnboundedSender<Packet>,
    kill: broadcast::Sender<()>,
    authenticated: bool,
    user_id: String,
    username: String,
    nickname: String,
}

/// A point-in-time view of one session's identity.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub authenticated: bool,
    pub user_id: String,
    pub username: String,
    pub nickname: String,
}

/// One online user as reported by presence queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineUser {
    pub user_id: String,
    pub username: String,
    pub nickname: String,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<SessionId, ClientEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted, unauthenticated connection.
    pub fn add(
        &self,
        session_id: SessionId,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<Packet>,
        kill: broadcast::Sender<()>,
    ) {
        self.clients.lock().insert(
            session_id,
            ClientEntry {
                addr,
                outbox,
                kill,
                authenticated: false,
                user_id: String::new(),
                username: String::new(),
                nickname: String::new(),
            },
        );
    }

    /// Removes a session; returns its last known identity for logging.
    /// Removing an absent session is a no-op.
    pub fn remove(&self, session_id: SessionId) -> Option<ClientInfo> {
        self.clients
            .lock()
            .remove(&session_id)
            .map(|entry| snapshot(&entry))
    }

    /// Flips a session to authenticated and records its identity. An empty
    /// username falls back to the user id, an empty nickname to the
    /// username. Calling this twice with the same identity is a no-op.
    pub fn mark_authenticated(
        &self,
        session_id: SessionId,
        user_id: &str,
        username: &str,
        nickname: &str,
    ) {
        let mut clients = self.clients.lock();
        if let Some(entry) = clients.get_mut(&session_id) {
            entry.authenticated = true;
            entry.user_id = user_id.to_string();
            entry.username = if username.is_empty() {
                user_id.to_string()
            } else {
                username.to_string()
            };
            entry.nickname = if nickname.is_empty() {
                entry.username.clone()
            } else {
                nickname.to_string()
            };
            info!(session_id, user_id, "session authenticated");
        } else {
            debug!(session_id, "mark_authenticated on unknown session");
        }
    }

    pub fn get_info(&self, session_id: SessionId) -> Option<ClientInfo> {
        self.clients
            .lock()
            .get(&session_id)
            .map(snapshot)
    }

    pub fn is_authenticated(&self, session_id: SessionId) -> bool {
        self.clients
            .lock()
            .get(&session_id)
            .map(|entry| entry.authenticated)
            .unwrap_or(false)
    }

    /// Resolves a user to at most one session.
    pub fn find_session_by_user(&self, user_id: &str) -> Option<SessionId> {
        self.clients
            .lock()
            .iter()
            .find(|(_, entry)| entry.authenticated && entry.user_id == user_id)
            .map(|(id, _)| *id)
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.find_session_by_user(user_id).is_some()
    }

    /// All authenticated sessions, optionally excluding one (the sender of
    /// a broadcast).
    pub fn snapshot_authenticated(&self, exclude: Option<SessionId>) -> Vec<SessionId> {
        self.clients
            .lock()
            .iter()
            .filter(|(id, entry)| entry.authenticated && Some(**id) != exclude)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn snapshot_online_user_ids(&self) -> Vec<String> {
        self.clients
            .lock()
            .values()
            .filter(|entry| entry.authenticated)
            .map(|entry| entry.user_id.clone())
            .collect()
    }

    pub fn snapshot_online_users(&self) -> Vec<OnlineUser> {
        self.clients
            .lock()
            .values()
            .filter(|entry| entry.authenticated)
            .map(|entry| OnlineUser {
                user_id: entry.user_id.clone(),
                username: entry.username.clone(),
                nickname: entry.nickname.clone(),
            })
            .collect()
    }

    /// Clones a session's outbox sender. The caller sends after the lock is
    /// released; enqueueing never blocks.
    pub fn outbox(&self, session_id: SessionId) -> Option<mpsc::UnboundedSender<Packet>> {
        self.clients
            .lock()
            .get(&session_id)
            .map(|entry| entry.outbox.clone())
    }

    /// Clones a session's kill switch; firing it is idempotent.
    pub fn kill_switch(&self, session_id: SessionId) -> Option<broadcast::Sender<()>> {
        self.clients
            .lock()
            .get(&session_id)
            .map(|entry| entry.kill.clone())
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

fn snapshot(entry: &ClientEntry) -> ClientInfo {
    ClientInfo {
        addr: entry.addr,
        authenticated: entry.authenticated,
        user_id: entry.user_id.clone(),
        username: entry.username.clone(),
        nickname: entry.nickname.clone(),
    }
}
