// src/core/dispatcher.rs

//! Classifies decoded frames and routes them to handlers, enforcing the
//! authentication gate along the way. Runs inline on the connection task,
//! so frames from one peer are always processed in arrival order.

use crate::core::handlers::{self, epoch_secs, ErrorBody};
use crate::core::protocol::{MessageKind, Packet};
use crate::core::registry::SessionId;
use crate::core::routing::ServerHandle;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct HeartbeatBody {
    timestamp: u64,
}

/// Operations a connection may only perform after login/register succeeded
/// in this session.
fn requires_auth(kind: MessageKind) -> bool {
    use MessageKind::*;
    matches!(
        kind,
        SendMessage
            | UserListRequest
            | FriendApplyRequest
            | FriendHandleRequest
            | FriendListRequest
            | FriendDeleteRequest
            | FriendBlockRequest
            | GroupCreateRequest
            | GroupListRequest
            | GroupMemberListRequest
            | GroupInviteRequest
            | GroupKickRequest
            | GroupQuitRequest
            | GroupDismissRequest
            | GroupUpdateInfoRequest
    )
}

pub async fn dispatch(server: &ServerHandle, session_id: SessionId, packet: Packet) {
    use MessageKind::*;

    if packet.kind.is_heartbeat() {
        debug!(session_id, kind = ?packet.kind, "dispatching frame");
    } else {
        info!(
            session_id,
            kind = ?packet.kind,
            payload_len = packet.payload.len(),
            "dispatching frame"
        );
    }

    // The gate reads the flag under the registry lock and releases it
    // before any handler or send runs.
    if requires_auth(packet.kind) && !server.is_authenticated(session_id) {
        server.send_json(session_id, Error, &ErrorBody::not_logged_in());
        return;
    }

    let payload = &packet.payload;
    match packet.kind {
        LoginRequest => handlers::auth::handle_login(server, session_id, payload).await,
        RegisterRequest => handlers::auth::handle_register(server, session_id, payload).await,
        Heartbeat => {
            server.send_json(
                session_id,
                HeartbeatResponse,
                &HeartbeatBody {
                    timestamp: epoch_secs(),
                },
            );
        }
        Logout => {
            info!(session_id, "logout requested, closing connection");
            server.close_session(session_id);
        }
        SendMessage => handlers::message::handle_send(server, session_id, payload).await,
        UserListRequest => handlers::user::handle_user_list(server, session_id),
        FriendApplyRequest => handlers::friend::handle_apply(server, session_id, payload).await,
        FriendHandleRequest => {
            handlers::friend::handle_apply_action(server, session_id, payload).await
        }
        FriendListRequest => handlers::friend::handle_friend_list(server, session_id).await,
        FriendDeleteRequest => handlers::friend::handle_delete(server, session_id, payload).await,
        FriendBlockRequest => handlers::friend::handle_block(server, session_id, payload).await,
        GroupCreateRequest => handlers::group::handle_create(server, session_id, payload).await,
        GroupListRequest => handlers::group::handle_group_list(server, session_id).await,
        GroupMemberListRequest => {
            handlers::group::handle_member_list(server, session_id, payload).await
        }
        GroupInviteRequest => handlers::group::handle_invite(server, session_id, payload).await,
        GroupKickRequest => handlers::group::handle_kick(server, session_id, payload).await,
        GroupQuitRequest => handlers::group::handle_quit(server, session_id, payload).await,
        GroupDismissRequest => handlers::group::handle_dismiss(server, session_id, payload).await,
        GroupUpdateInfoRequest => {
            handlers::group::handle_update_info(server, session_id, payload).await
        }
        other => {
            // Server-to-client kinds echoed back, or future codes.
            warn!(session_id, kind = ?other, "unexpected message kind from client, ignored");
        }
    }
}
