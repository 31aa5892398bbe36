// src/core/handlers/message.rs

//! Chat message forwarding: direct, broadcast, and group fan-out.

use super::{epoch_secs, store_error, ErrorBody};
use crate::core::protocol::MessageKind;
use crate::core::registry::SessionId;
use crate::core::routing::ServerHandle;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub to_user_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub conversation_type: String,
    #[serde(default)]
    pub group_id: String,
}

/// The frame delivered to recipients. Group messages carry `group_id`,
/// direct messages carry `to_user_id`, broadcasts carry neither.
#[derive(Debug, Serialize)]
pub struct ReceiveMessage {
    pub conversation_type: String,
    pub from_user_id: String,
    pub from_username: String,
    pub content: String,
    pub message_type: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
}

pub async fn handle_send(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let req: SendMessageRequest = serde_json::from_slice(payload).unwrap_or_default();

    if req.content.is_empty() {
        server.send_json(
            session_id,
            MessageKind::Error,
            &ErrorBody::new(1002, "消息内容不能为空"),
        );
        return;
    }

    let Some(sender) = server.authenticated_client(session_id) else {
        server.send_json(session_id, MessageKind::Error, &ErrorBody::not_logged_in());
        return;
    };

    let is_group = req.conversation_type == "group";
    if is_group && req.group_id.is_empty() {
        server.send_json(
            session_id,
            MessageKind::Error,
            &ErrorBody::new(3002, "group_id 不能为空"),
        );
        return;
    }

    let message = ReceiveMessage {
        conversation_type: if is_group { "group" } else { "single" }.to_string(),
        from_user_id: sender.user_id.clone(),
        from_username: sender.username.clone(),
        content: req.content,
        message_type: if req.message_type.is_empty() {
            "text".to_string()
        } else {
            req.message_type
        },
        timestamp: epoch_secs(),
        group_id: is_group.then(|| req.group_id.clone()),
        to_user_id: (!is_group && !req.to_user_id.is_empty() && req.to_user_id != "all")
            .then(|| req.to_user_id.clone()),
    };

    if is_group {
        fan_out_group(server, session_id, &sender.user_id, &req.group_id, &message).await;
    } else if req.to_user_id == "all" {
        server.broadcast_json(MessageKind::ReceiveMessage, &message, Some(session_id));
        info!(from = %sender.username, "broadcast chat message");
    } else if req.to_user_id.is_empty() {
        warn!(from = %sender.username, "direct message without target");
        server.send_json(
            session_id,
            MessageKind::Error,
            &ErrorBody::new(1003, "目标用户ID不能为空"),
        );
    } else if server.is_user_online(&req.to_user_id) {
        server.send_json_to_user(&req.to_user_id, MessageKind::ReceiveMessage, &message);
        info!(from = %sender.username, to = %req.to_user_id, "direct chat message");
    } else {
        warn!(from = %sender.username, to = %req.to_user_id, "direct message target offline");
        server.send_json(
            session_id,
            MessageKind::Error,
            &ErrorBody {
                error_code: 1004,
                error_message: "目标用户不在线".to_string(),
                to_user_id: Some(req.to_user_id),
            },
        );
    }
}

/// Group conversation: verify membership, then deliver to every member.
/// The sender gets the echo too; the client relies on it as its send
/// confirmation.
async fn fan_out_group(
    server: &ServerHandle,
    session_id: SessionId,
    sender_user_id: &str,
    group_id: &str,
    message: &ReceiveMessage,
) {
    let (Ok(group), Ok(sender)) = (group_id.parse::<i64>(), sender_user_id.parse::<i64>()) else {
        server.send_json(
            session_id,
            MessageKind::Error,
            &ErrorBody::new(3100, "您不是该群成员，无法发送群消息"),
        );
        return;
    };

    match server.stores().groups.is_member(group, sender).await {
        Ok(true) => {}
        Ok(false) => {
            server.send_json(
                session_id,
                MessageKind::Error,
                &ErrorBody::new(3100, "您不是该群成员，无法发送群消息"),
            );
            return;
        }
        Err(e) => {
            warn!(group_id, "group membership check failed: {e}");
            server.send_json(
                session_id,
                MessageKind::Error,
                &store_error(&e, 5001, "查询群成员失败"),
            );
            return;
        }
    }

    let member_ids = match server.stores().groups.member_ids(group).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(group_id, "group member list query failed: {e}");
            server.send_json(
                session_id,
                MessageKind::Error,
                &store_error(&e, 5002, "查询群成员列表失败"),
            );
            return;
        }
    };

    let member_count = member_ids.len();
    for member_id in member_ids {
        server.send_json_to_user(
            &member_id.to_string(),
            MessageKind::ReceiveMessage,
            message,
        );
    }
    info!(group_id, from = sender_user_id, member_count, "group chat message fanned out");
}
