// src/core/handlers/user.rs

//! Presence query: who is online right now.

use crate::core::protocol::MessageKind;
use crate::core::registry::SessionId;
use crate::core::routing::ServerHandle;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct UserListEntry {
    user_id: String,
    username: String,
    nickname: String,
    online: bool,
}

#[derive(Debug, Serialize)]
struct UserListResponse {
    users: Vec<UserListEntry>,
}

pub fn handle_user_list(server: &ServerHandle, session_id: SessionId) {
    let users: Vec<UserListEntry> = server
        .online_users()
        .into_iter()
        .map(|user| UserListEntry {
            user_id: user.user_id,
            username: user.username,
            nickname: user.nickname,
            online: true,
        })
        .collect();

    info!(session_id, online = users.len(), "user list");
    server.send_json(
        session_id,
        MessageKind::UserListResponse,
        &UserListResponse { users },
    );
}
