// src/core/handlers/friend.rs

//! Friend relationships: applications, handling, listing, deletion, and
//! blocking.

use super::{epoch_secs, flexible_id, store_failure, ErrorBody, OpFailure};
use crate::core::protocol::MessageKind;
use crate::core::registry::SessionId;
use crate::core::routing::ServerHandle;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct FriendApplyRequest {
    #[serde(default)]
    pub target_username: String,
    #[serde(default)]
    pub greeting: String,
}

#[derive(Debug, Serialize)]
struct FriendApplyAccepted {
    success: bool,
    apply_id: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ApplyFromUser {
    user_id: String,
    username: String,
}

#[derive(Debug, Serialize)]
struct FriendApplyNotify {
    apply_id: String,
    from_user: ApplyFromUser,
    greeting: String,
    created_at: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct FriendHandleRequest {
    #[serde(default, deserialize_with = "flexible_id")]
    pub apply_id: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Serialize)]
struct FriendHandleDone {
    success: bool,
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct FriendHandleNotify {
    apply_id: String,
    result: &'static str,
}

#[derive(Debug, Serialize)]
struct FriendListEntry {
    user_id: String,
    username: String,
    nickname: String,
    remark: String,
    group_name: String,
    is_blocked: bool,
    online: bool,
}

#[derive(Debug, Serialize)]
struct FriendListResponse {
    success: bool,
    friends: Vec<FriendListEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FriendDeleteRequest {
    #[serde(default, deserialize_with = "flexible_id")]
    pub friend_user_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FriendBlockRequest {
    #[serde(default, deserialize_with = "flexible_id")]
    pub target_user_id: String,
    #[serde(default)]
    pub block: bool,
}

#[derive(Debug, Serialize)]
struct SimpleDone {
    success: bool,
    message: String,
}

pub async fn handle_apply(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(sender) = server.authenticated_client(session_id) else {
        server.send_json(session_id, MessageKind::Error, &ErrorBody::not_logged_in());
        return;
    };
    let req: FriendApplyRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::FriendApplyResponse, body);
    };

    if req.target_username.is_empty() {
        respond(&OpFailure::new(2001, "target_username 不能为空"));
        return;
    }

    let target_id = match server.stores().users.find_user_id(&req.target_username).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            respond(&OpFailure::new(2001, "目标用户名不存在"));
            return;
        }
        Err(e) => {
            error!(target = %req.target_username, "target user lookup failed: {e}");
            respond(&store_failure(&e, 5001, "查询目标用户失败"));
            return;
        }
    };

    let self_id: i64 = sender.user_id.parse().unwrap_or(-1);
    if target_id == self_id {
        respond(&OpFailure::new(2002, "不能添加自己为好友"));
        return;
    }

    match server.stores().friends.are_friends(self_id, target_id).await {
        Ok(true) => {
            respond(&OpFailure::new(2003, "已经是好友"));
            return;
        }
        Ok(false) => {}
        // A failed relationship check does not block the application.
        Err(e) => warn!("friendship check failed: {e}"),
    }

    let greeting = (!req.greeting.is_empty()).then_some(req.greeting.as_str());
    let apply_id = match server
        .stores()
        .friends
        .create_apply(self_id, target_id, greeting)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!(target_id, "friend apply insert failed: {e}");
            respond(&store_failure(&e, 5002, "发送好友申请失败"));
            return;
        }
    };

    server.send_json(
        session_id,
        MessageKind::FriendApplyResponse,
        &FriendApplyAccepted {
            success: true,
            apply_id: apply_id.to_string(),
            message: "好友申请已发送".to_string(),
        },
    );
    info!(from = %sender.user_id, target_id, apply_id, "friend application sent");

    // Push the application to the target if they are online right now.
    let target_user_id = target_id.to_string();
    if server.is_user_online(&target_user_id) {
        server.send_json_to_user(
            &target_user_id,
            MessageKind::FriendApplyNotify,
            &FriendApplyNotify {
                apply_id: apply_id.to_string(),
                from_user: ApplyFromUser {
                    user_id: sender.user_id,
                    username: sender.username,
                },
                greeting: req.greeting,
                created_at: epoch_secs(),
            },
        );
    }
}

pub async fn handle_apply_action(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(handler) = server.authenticated_client(session_id) else {
        server.send_json(session_id, MessageKind::Error, &ErrorBody::not_logged_in());
        return;
    };
    let req: FriendHandleRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::FriendHandleResponse, body);
    };

    let apply_id: i64 = match req.apply_id.parse() {
        Ok(id) if !req.action.is_empty() => id,
        _ => {
            respond(&OpFailure::new(2003, "参数不完整"));
            return;
        }
    };
    let accept = req.action.eq_ignore_ascii_case("accept");

    let self_id: i64 = handler.user_id.parse().unwrap_or(-1);
    let apply = match server.stores().friends.find_apply(apply_id, self_id).await {
        Ok(Some(apply)) => apply,
        Ok(None) => {
            respond(&OpFailure::new(2004, "好友申请不存在或无权限处理"));
            return;
        }
        Err(e) => {
            error!(apply_id, "friend apply lookup failed: {e}");
            respond(&store_failure(&e, 5003, "查询好友申请失败"));
            return;
        }
    };

    if apply.status != 0 {
        respond(&OpFailure::new(2005, "该申请已处理"));
        return;
    }

    if let Err(e) = server
        .stores()
        .friends
        .mark_apply_handled(apply_id, accept)
        .await
    {
        error!(apply_id, "friend apply update failed: {e}");
        respond(&store_failure(&e, 5004, "更新好友申请失败"));
        return;
    }

    if accept {
        if let Err(e) = server
            .stores()
            .friends
            .add_friendship(apply.from_user_id, apply.to_user_id)
            .await
        {
            // The apply is already accepted; the relationship insert is
            // retried next time either side applies.
            error!(apply_id, "friendship insert failed: {e}");
        }
    }

    let result = if accept { "accept" } else { "reject" };
    server.send_json(
        session_id,
        MessageKind::FriendHandleResponse,
        &FriendHandleDone {
            success: true,
            action: result,
        },
    );
    info!(apply_id, result, handler = %handler.user_id, "friend application handled");

    // Tell the applicant how it went; a no-op if they are offline.
    server.send_json_to_user(
        &apply.from_user_id.to_string(),
        MessageKind::FriendHandleNotify,
        &FriendHandleNotify {
            apply_id: apply_id.to_string(),
            result,
        },
    );
}

pub async fn handle_friend_list(server: &ServerHandle, session_id: SessionId) {
    let Some(client) = server.authenticated_client(session_id) else {
        server.send_json(session_id, MessageKind::Error, &ErrorBody::not_logged_in());
        return;
    };

    let self_id: i64 = client.user_id.parse().unwrap_or(-1);
    let entries = match server.stores().friends.list_friends(self_id).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(user_id = %client.user_id, "friend list query failed: {e}");
            server.send_json(
                session_id,
                MessageKind::FriendListResponse,
                &store_failure(&e, 5005, "查询好友列表失败"),
            );
            return;
        }
    };

    let friends = entries
        .into_iter()
        .map(|entry| {
            let user_id = entry.user_id.to_string();
            let online = server.is_user_online(&user_id);
            FriendListEntry {
                user_id,
                username: entry.username,
                nickname: entry.nickname,
                remark: entry.remark,
                group_name: entry.group_name,
                is_blocked: entry.is_blocked,
                online,
            }
        })
        .collect();

    server.send_json(
        session_id,
        MessageKind::FriendListResponse,
        &FriendListResponse {
            success: true,
            friends,
        },
    );
}

pub async fn handle_delete(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(client) = server.authenticated_client(session_id) else {
        server.send_json(session_id, MessageKind::Error, &ErrorBody::not_logged_in());
        return;
    };
    let req: FriendDeleteRequest = serde_json::from_slice(payload).unwrap_or_default();

    let Ok(friend_id) = req.friend_user_id.parse::<i64>() else {
        server.send_json(
            session_id,
            MessageKind::FriendDeleteResponse,
            &OpFailure::new(2006, "friend_user_id 不能为空"),
        );
        return;
    };

    let self_id: i64 = client.user_id.parse().unwrap_or(-1);
    match server
        .stores()
        .friends
        .delete_friendship(self_id, friend_id)
        .await
    {
        Ok(()) => {
            info!(user_id = %client.user_id, friend_id, "friend deleted");
            server.send_json(
                session_id,
                MessageKind::FriendDeleteResponse,
                &SimpleDone {
                    success: true,
                    message: "已删除好友".to_string(),
                },
            );
        }
        Err(e) => {
            error!(friend_id, "friend delete failed: {e}");
            server.send_json(
                session_id,
                MessageKind::FriendDeleteResponse,
                &store_failure(&e, 5006, "删除好友失败"),
            );
        }
    }
}

pub async fn handle_block(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(client) = server.authenticated_client(session_id) else {
        server.send_json(session_id, MessageKind::Error, &ErrorBody::not_logged_in());
        return;
    };
    let req: FriendBlockRequest = serde_json::from_slice(payload).unwrap_or_default();

    let Ok(target_id) = req.target_user_id.parse::<i64>() else {
        server.send_json(
            session_id,
            MessageKind::FriendBlockResponse,
            &OpFailure::new(2007, "target_user_id 不能为空"),
        );
        return;
    };

    #[derive(Serialize)]
    struct BlockDone {
        success: bool,
        block: bool,
    }

    let self_id: i64 = client.user_id.parse().unwrap_or(-1);
    match server
        .stores()
        .friends
        .set_blocked(self_id, target_id, req.block)
        .await
    {
        Ok(()) => {
            info!(user_id = %client.user_id, target_id, block = req.block, "block flag updated");
            server.send_json(
                session_id,
                MessageKind::FriendBlockResponse,
                &BlockDone {
                    success: true,
                    block: req.block,
                },
            );
        }
        Err(e) => {
            error!(target_id, "block update failed: {e}");
            server.send_json(
                session_id,
                MessageKind::FriendBlockResponse,
                &store_failure(&e, 5007, "更新拉黑状态失败"),
            );
        }
    }
}
