// src/core/handlers/group.rs

//! Group lifecycle and membership: create, list, member list, invite,
//! kick, quit, dismiss, and info updates, with notifications to affected
//! members.

use super::{epoch_secs, store_failure, ErrorBody, OpFailure};
use crate::core::protocol::MessageKind;
use crate::core::registry::{ClientInfo, SessionId};
use crate::core::routing::ServerHandle;
use crate::store::MemberRole;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct GroupCreateRequest {
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub member_user_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GroupBody {
    group_id: String,
    group_name: String,
    owner_id: String,
    avatar_url: String,
    announcement: Option<String>,
    created_at: u64,
}

#[derive(Debug, Serialize)]
struct GroupCreateDone {
    success: bool,
    group: GroupBody,
}

#[derive(Debug, Serialize)]
struct GroupListEntry {
    group_id: String,
    group_name: String,
    avatar_url: String,
    announcement: Option<String>,
    role: &'static str,
}

#[derive(Debug, Serialize)]
struct GroupListResponse {
    success: bool,
    groups: Vec<GroupListEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupTargetRequest {
    #[serde(default)]
    pub group_id: String,
}

#[derive(Debug, Serialize)]
struct GroupMemberEntryBody {
    user_id: String,
    nickname_in_group: String,
    role: &'static str,
    online: bool,
}

#[derive(Debug, Serialize)]
struct GroupMemberListDone {
    success: bool,
    group_id: String,
    members: Vec<GroupMemberEntryBody>,
    group: GroupBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupMembersRequest {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub member_user_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupUpdateInfoRequest {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub announcement: String,
}

#[derive(Debug, Serialize)]
struct SimpleDone {
    success: bool,
    message: String,
}

fn role_str(role: MemberRole) -> &'static str {
    role.as_str()
}

/// Fetches the caller's identity or answers with the login-required error.
fn require_client(server: &ServerHandle, session_id: SessionId) -> Option<ClientInfo> {
    let client = server.authenticated_client(session_id);
    if client.is_none() {
        server.send_json(session_id, MessageKind::Error, &ErrorBody::not_logged_in());
    }
    client
}

pub async fn handle_create(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(creator) = require_client(server, session_id) else {
        return;
    };
    let req: GroupCreateRequest = serde_json::from_slice(payload).unwrap_or_default();

    if req.group_name.is_empty() {
        server.send_json(
            session_id,
            MessageKind::GroupCreateResponse,
            &OpFailure::new(3001, "群名称不能为空"),
        );
        return;
    }

    let owner_id: i64 = creator.user_id.parse().unwrap_or(-1);
    let avatar = (!req.avatar_url.is_empty()).then_some(req.avatar_url.as_str());
    let group_id = match server
        .stores()
        .groups
        .create_group(&req.group_name, owner_id, avatar)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!(group_name = %req.group_name, "group insert failed: {e}");
            server.send_json(
                session_id,
                MessageKind::GroupCreateResponse,
                &store_failure(&e, 5001, "创建群失败"),
            );
            return;
        }
    };

    if let Err(e) = server
        .stores()
        .groups
        .add_member(group_id, owner_id, MemberRole::Owner)
        .await
    {
        error!(group_id, "owner membership insert failed: {e}");
    }

    // Seed the remaining members; unknown ids and the creator are skipped.
    for member in &req.member_user_ids {
        let Ok(member_id) = member.parse::<i64>() else {
            continue;
        };
        if member_id == owner_id {
            continue;
        }
        match server.stores().users.user_id_exists(member_id).await {
            Ok(true) => {
                if let Err(e) = server
                    .stores()
                    .groups
                    .add_member(group_id, member_id, MemberRole::Member)
                    .await
                {
                    warn!(group_id, member_id, "member insert failed: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(member_id, "member existence check failed: {e}"),
        }
    }

    server.send_json(
        session_id,
        MessageKind::GroupCreateResponse,
        &GroupCreateDone {
            success: true,
            group: GroupBody {
                group_id: group_id.to_string(),
                group_name: req.group_name.clone(),
                owner_id: creator.user_id.clone(),
                avatar_url: req.avatar_url,
                announcement: Some(String::new()),
                created_at: epoch_secs(),
            },
        },
    );
    info!(group_id, creator = %creator.username, "group created");
}

pub async fn handle_group_list(server: &ServerHandle, session_id: SessionId) {
    let Some(client) = require_client(server, session_id) else {
        return;
    };

    let user_id: i64 = client.user_id.parse().unwrap_or(-1);
    let entries = match server.stores().groups.groups_for_user(user_id).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(user_id, "group list query failed: {e}");
            server.send_json(
                session_id,
                MessageKind::GroupListResponse,
                &store_failure(&e, 5002, "查询群列表失败"),
            );
            return;
        }
    };

    let groups = entries
        .into_iter()
        .map(|entry| GroupListEntry {
            group_id: entry.group_id.to_string(),
            group_name: entry.group_name,
            avatar_url: entry.avatar_url,
            announcement: entry.announcement,
            role: role_str(entry.role),
        })
        .collect();

    server.send_json(
        session_id,
        MessageKind::GroupListResponse,
        &GroupListResponse {
            success: true,
            groups,
        },
    );
}

pub async fn handle_member_list(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(client) = require_client(server, session_id) else {
        return;
    };
    let req: GroupTargetRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond_fail = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::GroupMemberListResponse, body);
    };

    if req.group_id.is_empty() {
        respond_fail(&OpFailure::new(3002, "group_id 不能为空"));
        return;
    }
    let user_id: i64 = client.user_id.parse().unwrap_or(-1);
    let Ok(group_id) = req.group_id.parse::<i64>() else {
        respond_fail(&OpFailure::new(3003, "您不是该群成员"));
        return;
    };

    match server.stores().groups.is_member(group_id, user_id).await {
        Ok(true) => {}
        Ok(false) => {
            respond_fail(&OpFailure::new(3003, "您不是该群成员"));
            return;
        }
        Err(e) => {
            error!(group_id, "membership check failed: {e}");
            respond_fail(&store_failure(&e, 5003, "查询群成员列表失败"));
            return;
        }
    }

    let info = match server.stores().groups.group_info(group_id).await {
        Ok(info) => info,
        Err(e) => {
            warn!(group_id, "group info query failed: {e}");
            None
        }
    };

    let member_rows = match server.stores().groups.list_members(group_id).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(group_id, "member list query failed: {e}");
            respond_fail(&store_failure(&e, 5003, "查询群成员列表失败"));
            return;
        }
    };

    let members = member_rows
        .into_iter()
        .map(|member| {
            let user_id = member.user_id.to_string();
            let online = server.is_user_online(&user_id);
            GroupMemberEntryBody {
                user_id,
                nickname_in_group: member.display_name,
                role: role_str(member.role),
                online,
            }
        })
        .collect();

    let group = match info {
        Some(info) => GroupBody {
            group_id: info.group_id.to_string(),
            group_name: info.group_name,
            owner_id: info.owner_id.to_string(),
            avatar_url: info.avatar_url,
            announcement: info.announcement,
            created_at: info.created_at.max(0) as u64,
        },
        None => GroupBody {
            group_id: req.group_id.clone(),
            group_name: String::new(),
            owner_id: String::new(),
            avatar_url: String::new(),
            announcement: None,
            created_at: epoch_secs(),
        },
    };

    server.send_json(
        session_id,
        MessageKind::GroupMemberListResponse,
        &GroupMemberListDone {
            success: true,
            group_id: req.group_id,
            members,
            group,
        },
    );
}

pub async fn handle_invite(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(inviter) = require_client(server, session_id) else {
        return;
    };
    let req: GroupMembersRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond_fail = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::GroupInviteResponse, body);
    };

    if req.group_id.is_empty() || req.member_user_ids.is_empty() {
        respond_fail(&OpFailure::new(3004, "group_id 和 member_user_ids 不能为空"));
        return;
    }
    let inviter_id: i64 = inviter.user_id.parse().unwrap_or(-1);
    let Ok(group_id) = req.group_id.parse::<i64>() else {
        respond_fail(&OpFailure::new(3005, "您不是该群成员"));
        return;
    };

    // Any member may invite; there is no acceptance step.
    match server.stores().groups.member_role(group_id, inviter_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            respond_fail(&OpFailure::new(3005, "您不是该群成员"));
            return;
        }
        Err(e) => {
            error!(group_id, "inviter membership check failed: {e}");
            respond_fail(&store_failure(&e, 3005, "您不是该群成员"));
            return;
        }
    }

    #[derive(Serialize)]
    struct InviteNotify<'a> {
        group_id: &'a str,
        inviter_id: &'a str,
        inviter_username: &'a str,
    }

    let mut invited = 0u32;
    for member in &req.member_user_ids {
        let Ok(member_id) = member.parse::<i64>() else {
            continue;
        };
        if member_id == inviter_id {
            continue;
        }
        if matches!(
            server.stores().groups.is_member(group_id, member_id).await,
            Ok(true)
        ) {
            continue;
        }
        match server.stores().users.user_id_exists(member_id).await {
            Ok(true) => {}
            _ => continue,
        }
        if let Err(e) = server
            .stores()
            .groups
            .add_member(group_id, member_id, MemberRole::Member)
            .await
        {
            warn!(group_id, member_id, "invite insert failed: {e}");
            continue;
        }
        invited += 1;

        let member_user_id = member_id.to_string();
        if server.is_user_online(&member_user_id) {
            server.send_json_to_user(
                &member_user_id,
                MessageKind::GroupInviteNotify,
                &InviteNotify {
                    group_id: &req.group_id,
                    inviter_id: &inviter.user_id,
                    inviter_username: &inviter.username,
                },
            );
        }
    }

    #[derive(Serialize)]
    struct InviteDone {
        success: bool,
        invited_count: u32,
    }

    server.send_json(
        session_id,
        MessageKind::GroupInviteResponse,
        &InviteDone {
            success: true,
            invited_count: invited,
        },
    );
    info!(group_id, inviter = %inviter.username, invited, "group invite");
}

pub async fn handle_kick(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(kicker) = require_client(server, session_id) else {
        return;
    };
    let req: GroupMembersRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond_fail = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::GroupKickResponse, body);
    };

    if req.group_id.is_empty() || req.member_user_ids.is_empty() {
        respond_fail(&OpFailure::new(3006, "group_id 和 member_user_ids 不能为空"));
        return;
    }
    let kicker_id: i64 = kicker.user_id.parse().unwrap_or(-1);
    let Ok(group_id) = req.group_id.parse::<i64>() else {
        respond_fail(&OpFailure::new(3007, "权限不足，只有群主或管理员可以踢人"));
        return;
    };

    let kicker_role = match server.stores().groups.member_role(group_id, kicker_id).await {
        Ok(role) => role,
        Err(e) => {
            error!(group_id, "kicker role check failed: {e}");
            respond_fail(&store_failure(&e, 3007, "权限不足，只有群主或管理员可以踢人"));
            return;
        }
    };
    let Some(kicker_role) = kicker_role.filter(|role| role.can_moderate()) else {
        respond_fail(&OpFailure::new(3007, "权限不足，只有群主或管理员可以踢人"));
        return;
    };

    #[derive(Serialize)]
    struct KickNotify<'a> {
        group_id: &'a str,
        kicker_id: &'a str,
    }

    let mut kicked = 0u32;
    for member in &req.member_user_ids {
        let Ok(member_id) = member.parse::<i64>() else {
            continue;
        };
        if member_id == kicker_id {
            continue;
        }
        let member_role = match server.stores().groups.member_role(group_id, member_id).await {
            Ok(Some(role)) => role,
            _ => continue,
        };
        // The owner is untouchable; admins answer only to the owner.
        if member_role == MemberRole::Owner {
            continue;
        }
        if member_role == MemberRole::Admin && kicker_role != MemberRole::Owner {
            continue;
        }
        if let Err(e) = server.stores().groups.remove_member(group_id, member_id).await {
            warn!(group_id, member_id, "kick delete failed: {e}");
            continue;
        }
        kicked += 1;

        let member_user_id = member_id.to_string();
        if server.is_user_online(&member_user_id) {
            server.send_json_to_user(
                &member_user_id,
                MessageKind::GroupKickNotify,
                &KickNotify {
                    group_id: &req.group_id,
                    kicker_id: &kicker.user_id,
                },
            );
        }
    }

    #[derive(Serialize)]
    struct KickDone {
        success: bool,
        kicked_count: u32,
    }

    server.send_json(
        session_id,
        MessageKind::GroupKickResponse,
        &KickDone {
            success: true,
            kicked_count: kicked,
        },
    );
    info!(group_id, kicker = %kicker.username, kicked, "group kick");
}

pub async fn handle_quit(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(client) = require_client(server, session_id) else {
        return;
    };
    let req: GroupTargetRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond_fail = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::GroupQuitResponse, body);
    };

    if req.group_id.is_empty() {
        respond_fail(&OpFailure::new(3008, "group_id 不能为空"));
        return;
    }
    let user_id: i64 = client.user_id.parse().unwrap_or(-1);
    let Ok(group_id) = req.group_id.parse::<i64>() else {
        respond_fail(&OpFailure::new(3009, "您不是该群成员"));
        return;
    };

    match server.stores().groups.member_role(group_id, user_id).await {
        Ok(Some(MemberRole::Owner)) => {
            respond_fail(&OpFailure::new(3010, "群主不能退群，请先解散群"));
            return;
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            respond_fail(&OpFailure::new(3009, "您不是该群成员"));
            return;
        }
        Err(e) => {
            error!(group_id, "quit role check failed: {e}");
            respond_fail(&store_failure(&e, 3009, "您不是该群成员"));
            return;
        }
    }

    if let Err(e) = server.stores().groups.remove_member(group_id, user_id).await {
        error!(group_id, user_id, "quit delete failed: {e}");
        respond_fail(&store_failure(&e, 5004, "退群失败"));
        return;
    }

    #[derive(Serialize)]
    struct QuitNotify<'a> {
        group_id: &'a str,
        quit_user_id: &'a str,
        quit_username: &'a str,
    }

    // Remaining members learn who left.
    if let Ok(member_ids) = server.stores().groups.member_ids(group_id).await {
        for member_id in member_ids {
            let member_user_id = member_id.to_string();
            if server.is_user_online(&member_user_id) {
                server.send_json_to_user(
                    &member_user_id,
                    MessageKind::GroupQuitNotify,
                    &QuitNotify {
                        group_id: &req.group_id,
                        quit_user_id: &client.user_id,
                        quit_username: &client.username,
                    },
                );
            }
        }
    }

    server.send_json(
        session_id,
        MessageKind::GroupQuitResponse,
        &SimpleDone {
            success: true,
            message: "已退出群聊".to_string(),
        },
    );
    info!(group_id, user = %client.username, "left group");
}

pub async fn handle_dismiss(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(client) = require_client(server, session_id) else {
        return;
    };
    let req: GroupTargetRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond_fail = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::GroupDismissResponse, body);
    };

    if req.group_id.is_empty() {
        respond_fail(&OpFailure::new(3011, "group_id 不能为空"));
        return;
    }
    let user_id: i64 = client.user_id.parse().unwrap_or(-1);
    let Ok(group_id) = req.group_id.parse::<i64>() else {
        respond_fail(&OpFailure::new(3012, "群不存在"));
        return;
    };

    let group = match server.stores().groups.group_info(group_id).await {
        Ok(Some(group)) => group,
        Ok(None) => {
            respond_fail(&OpFailure::new(3012, "群不存在"));
            return;
        }
        Err(e) => {
            error!(group_id, "dismiss info query failed: {e}");
            respond_fail(&store_failure(&e, 5005, "查询群信息失败"));
            return;
        }
    };

    if group.owner_id != user_id {
        respond_fail(&OpFailure::new(3013, "只有群主可以解散群"));
        return;
    }

    // Capture the member set before it is deleted.
    let member_ids = server
        .stores()
        .groups
        .member_ids(group_id)
        .await
        .unwrap_or_default();

    if let Err(e) = server.stores().groups.dismiss_group(group_id).await {
        error!(group_id, "dismiss failed: {e}");
        respond_fail(&store_failure(&e, 5006, "解散群失败"));
        return;
    }

    #[derive(Serialize)]
    struct DismissNotify<'a> {
        group_id: &'a str,
    }

    for member_id in member_ids {
        if member_id == user_id {
            continue;
        }
        let member_user_id = member_id.to_string();
        if server.is_user_online(&member_user_id) {
            server.send_json_to_user(
                &member_user_id,
                MessageKind::GroupDismissNotify,
                &DismissNotify {
                    group_id: &req.group_id,
                },
            );
        }
    }

    server.send_json(
        session_id,
        MessageKind::GroupDismissResponse,
        &SimpleDone {
            success: true,
            message: "群已解散".to_string(),
        },
    );
    info!(group_id, owner = %client.username, "group dismissed");
}

pub async fn handle_update_info(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let Some(client) = require_client(server, session_id) else {
        return;
    };
    let req: GroupUpdateInfoRequest = serde_json::from_slice(payload).unwrap_or_default();
    let respond_fail = |body: &OpFailure| {
        server.send_json(session_id, MessageKind::GroupUpdateInfoResponse, body);
    };

    if req.group_id.is_empty() {
        respond_fail(&OpFailure::new(3014, "group_id 不能为空"));
        return;
    }
    let user_id: i64 = client.user_id.parse().unwrap_or(-1);
    let Ok(group_id) = req.group_id.parse::<i64>() else {
        respond_fail(&OpFailure::new(
            3015,
            "权限不足，只有群主或管理员可以更新群信息",
        ));
        return;
    };

    match server.stores().groups.member_role(group_id, user_id).await {
        Ok(Some(role)) if role.can_moderate() => {}
        Ok(_) => {
            respond_fail(&OpFailure::new(
                3015,
                "权限不足，只有群主或管理员可以更新群信息",
            ));
            return;
        }
        Err(e) => {
            error!(group_id, "update-info role check failed: {e}");
            respond_fail(&store_failure(
                &e,
                3015,
                "权限不足，只有群主或管理员可以更新群信息",
            ));
            return;
        }
    }

    let group_name = (!req.group_name.is_empty()).then_some(req.group_name.as_str());
    let announcement = (!req.announcement.is_empty()).then_some(req.announcement.as_str());
    if group_name.is_none() && announcement.is_none() {
        respond_fail(&OpFailure::new(3016, "至少需要更新一个字段"));
        return;
    }

    if let Err(e) = server
        .stores()
        .groups
        .update_group_info(group_id, group_name, announcement)
        .await
    {
        error!(group_id, "group info update failed: {e}");
        respond_fail(&store_failure(&e, 5007, "更新群信息失败"));
        return;
    }

    #[derive(Serialize)]
    struct UpdateNotify<'a> {
        group_id: &'a str,
        group_name: &'a str,
        announcement: &'a str,
    }

    if let Ok(member_ids) = server.stores().groups.member_ids(group_id).await {
        for member_id in member_ids {
            if member_id == user_id {
                continue;
            }
            let member_user_id = member_id.to_string();
            if server.is_user_online(&member_user_id) {
                server.send_json_to_user(
                    &member_user_id,
                    MessageKind::GroupUpdateInfoNotify,
                    &UpdateNotify {
                        group_id: &req.group_id,
                        group_name: &req.group_name,
                        announcement: &req.announcement,
                    },
                );
            }
        }
    }

    server.send_json(
        session_id,
        MessageKind::GroupUpdateInfoResponse,
        &SimpleDone {
            success: true,
            message: "群信息已更新".to_string(),
        },
    );
    info!(group_id, updater = %client.username, "group info updated");
}
