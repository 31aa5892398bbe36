// tests/common/mod.rs

//! Test helpers: an in-memory store backend and a framed TCP client for
//! driving a real server instance end to end.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ferrochat::config::Config;
use ferrochat::core::protocol::{ImCodec, MessageKind, Packet};
use ferrochat::core::state::ServerState;
use ferrochat::server::connection_loop;
use ferrochat::server::ServerContext;
use ferrochat::store::{
    FriendApply, FriendEntry, FriendStore, GroupEntry, GroupInfo, GroupMemberEntry, GroupStore,
    MemberRole, StoreError, Stores, UserStore, VerifiedUser,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct UserRecord {
    user_id: i64,
    username: String,
    password: String,
    nickname: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct FriendMeta {
    remark: String,
    group_name: String,
    is_blocked: bool,
}

#[derive(Debug, Clone)]
struct ApplyRecord {
    from_user_id: i64,
    to_user_id: i64,
    status: i8,
}

#[derive(Debug, Clone)]
struct GroupRecord {
    group_name: String,
    owner_id: i64,
    avatar_url: Option<String>,
    announcement: Option<String>,
    created_at: i64,
}

#[derive(Default)]
struct MemoryInner {
    users: Vec<UserRecord>,
    next_user_id: i64,
    friends: HashMap<(i64, i64), FriendMeta>,
    applies: HashMap<i64, ApplyRecord>,
    next_apply_id: i64,
    groups: HashMap<i64, GroupRecord>,
    next_group_id: i64,
    members: HashMap<(i64, i64), MemberRole>,
}

/// An in-memory stand-in for the MySQL backend. Passwords are compared in
/// the clear; hashing is the real backend's concern, not the contract's.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user with a fixed id.
    pub fn seed_user(&self, user_id: i64, username: &str, password: &str, nickname: &str) {
        let mut inner = self.inner.lock();
        inner.users.push(UserRecord {
            user_id,
            username: username.to_string(),
            password: password.to_string(),
            nickname: (!nickname.is_empty()).then(|| nickname.to_string()),
        });
        inner.next_user_id = inner.next_user_id.max(user_id);
    }

    /// Seeds a group with a fixed id; the first member is the owner.
    pub fn seed_group(&self, group_id: i64, group_name: &str, owner_id: i64, member_ids: &[i64]) {
        let mut inner = self.inner.lock();
        inner.groups.insert(
            group_id,
            GroupRecord {
                group_name: group_name.to_string(),
                owner_id,
                avatar_url: None,
                announcement: None,
                created_at: 1_700_000_000,
            },
        );
        inner.next_group_id = inner.next_group_id.max(group_id);
        inner.members.insert((group_id, owner_id), MemberRole::Owner);
        for &member_id in member_ids {
            if member_id != owner_id {
                inner
                    .members
                    .insert((group_id, member_id), MemberRole::Member);
            }
        }
    }

    pub fn seed_friendship(&self, a: i64, b: i64) {
        let mut inner = self.inner.lock();
        inner.friends.insert((a, b), FriendMeta::default());
        inner.friends.insert((b, a), FriendMeta::default());
    }

    pub fn member_role_of(&self, group_id: i64, user_id: i64) -> Option<MemberRole> {
        self.inner.lock().members.get(&(group_id, user_id)).copied()
    }

    pub fn friendship_exists(&self, a: i64, b: i64) -> bool {
        self.inner.lock().friends.contains_key(&(a, b))
    }

    pub fn group_exists(&self, group_id: i64) -> bool {
        self.inner.lock().groups.contains_key(&group_id)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn verify_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<VerifiedUser>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .users
            .iter()
            .find(|u| u.username == username && u.password == password)
            .map(|u| VerifiedUser {
                user_id: u.user_id,
                nickname: u.nickname.clone().unwrap_or_else(|| u.username.clone()),
            }))
    }

    async fn register_user(
        &self,
        username: &str,
        password: &str,
        nickname: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        if inner.users.iter().any(|u| u.username == username) {
            return Err(StoreError::UsernameTaken);
        }
        inner.next_user_id += 1;
        let user_id = inner.next_user_id;
        inner.users.push(UserRecord {
            user_id,
            username: username.to_string(),
            password: password.to_string(),
            nickname: nickname.map(|n| n.to_string()),
        });
        Ok(user_id)
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().users.iter().any(|u| u.username == username))
    }

    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .inner
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.user_id))
    }

    async fn user_id_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.lock().users.iter().any(|u| u.user_id == user_id))
    }
}

#[async_trait]
impl FriendStore for MemoryStore {
    async fn are_friends(&self, user_id: i64, friend_user_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .friends
            .contains_key(&(user_id, friend_user_id)))
    }

    async fn create_apply(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        _greeting: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_apply_id += 1;
        let apply_id = inner.next_apply_id;
        inner.applies.insert(
            apply_id,
            ApplyRecord {
                from_user_id,
                to_user_id,
                status: 0,
            },
        );
        Ok(apply_id)
    }

    async fn find_apply(
        &self,
        apply_id: i64,
        to_user_id: i64,
    ) -> Result<Option<FriendApply>, StoreError> {
        Ok(self
            .inner
            .lock()
            .applies
            .get(&apply_id)
            .filter(|a| a.to_user_id == to_user_id)
            .map(|a| FriendApply {
                apply_id,
                from_user_id: a.from_user_id,
                to_user_id: a.to_user_id,
                status: a.status,
            }))
    }

    async fn mark_apply_handled(&self, apply_id: i64, accepted: bool) -> Result<(), StoreError> {
        if let Some(apply) = self.inner.lock().applies.get_mut(&apply_id) {
            apply.status = if accepted { 1 } else { 2 };
        }
        Ok(())
    }

    async fn add_friendship(&self, user_id: i64, friend_user_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner
            .friends
            .entry((user_id, friend_user_id))
            .or_default();
        inner
            .friends
            .entry((friend_user_id, user_id))
            .or_default();
        Ok(())
    }

    async fn list_friends(&self, user_id: i64) -> Result<Vec<FriendEntry>, StoreError> {
        let inner = self.inner.lock();
        let mut entries: Vec<FriendEntry> = inner
            .friends
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .filter_map(|((_, friend_id), meta)| {
                inner
                    .users
                    .iter()
                    .find(|u| u.user_id == *friend_id)
                    .map(|u| FriendEntry {
                        user_id: *friend_id,
                        username: u.username.clone(),
                        nickname: u.nickname.clone().unwrap_or_else(|| u.username.clone()),
                        remark: meta.remark.clone(),
                        group_name: meta.group_name.clone(),
                        is_blocked: meta.is_blocked,
                    })
            })
            .collect();
        entries.sort_by_key(|e| e.user_id);
        Ok(entries)
    }

    async fn delete_friendship(
        &self,
        user_id: i64,
        friend_user_id: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.friends.remove(&(user_id, friend_user_id));
        inner.friends.remove(&(friend_user_id, user_id));
        Ok(())
    }

    async fn set_blocked(
        &self,
        user_id: i64,
        friend_user_id: i64,
        blocked: bool,
    ) -> Result<(), StoreError> {
        if let Some(meta) = self.inner.lock().friends.get_mut(&(user_id, friend_user_id)) {
            meta.is_blocked = blocked;
        }
        Ok(())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn create_group(
        &self,
        group_name: &str,
        owner_id: i64,
        avatar_url: Option<&str>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_group_id += 1;
        let group_id = inner.next_group_id;
        inner.groups.insert(
            group_id,
            GroupRecord {
                group_name: group_name.to_string(),
                owner_id,
                avatar_url: avatar_url.map(|a| a.to_string()),
                announcement: None,
                created_at: 1_700_000_000,
            },
        );
        Ok(group_id)
    }

    async fn add_member(
        &self,
        group_id: i64,
        user_id: i64,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .members
            .entry((group_id, user_id))
            .or_insert(role);
        Ok(())
    }

    async fn groups_for_user(&self, user_id: i64) -> Result<Vec<GroupEntry>, StoreError> {
        let inner = self.inner.lock();
        let mut entries: Vec<GroupEntry> = inner
            .members
            .iter()
            .filter(|((_, member), _)| *member == user_id)
            .filter_map(|((group_id, _), role)| {
                inner.groups.get(group_id).map(|g| GroupEntry {
                    group_id: *group_id,
                    group_name: g.group_name.clone(),
                    avatar_url: g.avatar_url.clone().unwrap_or_default(),
                    announcement: g.announcement.clone(),
                    role: *role,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.group_id);
        Ok(entries)
    }

    async fn group_info(&self, group_id: i64) -> Result<Option<GroupInfo>, StoreError> {
        Ok(self.inner.lock().groups.get(&group_id).map(|g| GroupInfo {
            group_id,
            group_name: g.group_name.clone(),
            owner_id: g.owner_id,
            avatar_url: g.avatar_url.clone().unwrap_or_default(),
            announcement: g.announcement.clone(),
            created_at: g.created_at,
        }))
    }

    async fn member_ids(&self, group_id: i64) -> Result<Vec<i64>, StoreError> {
        let mut ids: Vec<i64> = self
            .inner
            .lock()
            .members
            .keys()
            .filter(|(group, _)| *group == group_id)
            .map(|(_, user_id)| *user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .members
            .contains_key(&(group_id, user_id)))
    }

    async fn member_role(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<Option<MemberRole>, StoreError> {
        Ok(self.inner.lock().members.get(&(group_id, user_id)).copied())
    }

    async fn list_members(&self, group_id: i64) -> Result<Vec<GroupMemberEntry>, StoreError> {
        let inner = self.inner.lock();
        let mut members: Vec<GroupMemberEntry> = inner
            .members
            .iter()
            .filter(|((group, _), _)| *group == group_id)
            .map(|((_, user_id), role)| {
                let display_name = inner
                    .users
                    .iter()
                    .find(|u| u.user_id == *user_id)
                    .map(|u| u.nickname.clone().unwrap_or_else(|| u.username.clone()))
                    .unwrap_or_default();
                GroupMemberEntry {
                    user_id: *user_id,
                    display_name,
                    role: *role,
                }
            })
            .collect();
        members.sort_by_key(|m| m.user_id);
        Ok(members)
    }

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<(), StoreError> {
        self.inner.lock().members.remove(&(group_id, user_id));
        Ok(())
    }

    async fn dismiss_group(&self, group_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.members.retain(|(group, _), _| *group != group_id);
        inner.groups.remove(&group_id);
        Ok(())
    }

    async fn update_group_info(
        &self,
        group_id: i64,
        group_name: Option<&str>,
        announcement: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(group) = self.inner.lock().groups.get_mut(&group_id) {
            if let Some(name) = group_name {
                group.group_name = name.to_string();
            }
            if let Some(announcement) = announcement {
                group.announcement = Some(announcement.to_string());
            }
        }
        Ok(())
    }
}

/// A live server instance on an ephemeral port, backed by a `MemoryStore`.
pub struct TestServer {
    pub state: Arc<ServerState>,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(store: MemoryStore) -> Self {
        let stores = Stores::from_backend(store);
        let state = Arc::new(ServerState::new(Config::default(), stores));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let ctx = ServerContext {
            state: state.clone(),
            listener,
        };
        let handle = tokio::spawn(connection_loop::run(ctx));
        Self {
            state,
            addr,
            handle,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.state.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// A framed client speaking the wire protocol against a `TestServer`.
pub struct TestClient {
    framed: Framed<TcpStream, ImCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.expect("connect");
        Self {
            framed: Framed::new(socket, ImCodec::new()),
        }
    }

    pub async fn send(&mut self, kind: MessageKind, body: Value) {
        let payload = Bytes::from(serde_json::to_vec(&body).expect("serialize"));
        self.framed
            .send(Packet::new(kind, payload))
            .await
            .expect("send frame");
    }

    pub async fn send_empty(&mut self, kind: MessageKind) {
        self.framed
            .send(Packet::empty(kind))
            .await
            .expect("send frame");
    }

    /// Writes raw bytes straight onto the socket, bypassing the encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.framed
            .get_mut()
            .write_all(bytes)
            .await
            .expect("raw write");
    }

    pub async fn recv(&mut self) -> Packet {
        tokio::time::timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("decode error")
    }

    /// Receives one frame, asserts its kind, and parses the JSON payload.
    pub async fn recv_json(&mut self, expected: MessageKind) -> Value {
        let packet = self.recv().await;
        assert_eq!(packet.kind, expected, "unexpected frame kind");
        serde_json::from_slice(&packet.payload).expect("payload is JSON")
    }

    /// True if no frame arrives within a short window.
    pub async fn expect_silence(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(300), self.framed.next())
            .await
            .is_err()
    }

    /// True if the server closed the connection.
    pub async fn expect_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Value {
        self.send(
            MessageKind::LoginRequest,
            serde_json::json!({ "username": username, "password": password }),
        )
        .await;
        self.recv_json(MessageKind::LoginResponse).await
    }
}
