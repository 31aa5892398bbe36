// src/store/mod.rs

//! The persistence facade: trait seams consumed by the handlers plus the
//! MySQL implementation behind them. Handlers never see SQL; they see the
//! operations below and map failures onto wire error codes.

mod mysql;

pub use mysql::MySqlStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failures surfaced by any store backend.
///
/// `Unavailable` maps onto wire code 5000; everything else is translated to
/// a call-site specific 5001+ code by the handler that hit it.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("username already taken")]
    UsernameTaken,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// A member's role within a group. Stored as the lowercase string in
/// `group_members.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "owner" => MemberRole::Owner,
            "admin" => MemberRole::Admin,
            _ => MemberRole::Member,
        }
    }

    /// Owners and admins share the moderation privileges (kick, update
    /// group info).
    pub fn can_moderate(self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

/// Result of a successful credential check.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub user_id: i64,
    pub nickname: String,
}

/// One row of `friend_applies`, scoped to the recipient.
#[derive(Debug, Clone)]
pub struct FriendApply {
    pub apply_id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    /// 0 pending, 1 accepted, 2 rejected.
    pub status: i8,
}

/// One friend-list row, already joined against `users`.
#[derive(Debug, Clone)]
pub struct FriendEntry {
    pub user_id: i64,
    pub username: String,
    pub nickname: String,
    pub remark: String,
    pub group_name: String,
    pub is_blocked: bool,
}

/// One group-list row for a given user, including that user's role.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub group_id: i64,
    pub group_name: String,
    pub avatar_url: String,
    pub announcement: Option<String>,
    pub role: MemberRole,
}

/// Full group metadata.
#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub group_id: i64,
    pub group_name: String,
    pub owner_id: i64,
    pub avatar_url: String,
    pub announcement: Option<String>,
    pub created_at: i64,
}

/// One member-list row; `display_name` is the in-group nickname with the
/// global nickname as fallback.
#[derive(Debug, Clone)]
pub struct GroupMemberEntry {
    pub user_id: i64,
    pub display_name: String,
    pub role: MemberRole,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Checks credentials. `Ok(None)` means unknown username or wrong
    /// password; the caller cannot tell which, and must not leak which.
    async fn verify_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<VerifiedUser>, StoreError>;

    /// Creates a user and returns its id. A duplicate username surfaces as
    /// `StoreError::UsernameTaken` (enforced by the schema's UNIQUE
    /// constraint, so concurrent registrations cannot both succeed).
    async fn register_user(
        &self,
        username: &str,
        password: &str,
        nickname: Option<&str>,
    ) -> Result<i64, StoreError>;

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError>;

    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, StoreError>;

    async fn user_id_exists(&self, user_id: i64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait FriendStore: Send + Sync {
    async fn are_friends(&self, user_id: i64, friend_user_id: i64) -> Result<bool, StoreError>;

    /// Inserts a friend application and returns its id.
    async fn create_apply(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        greeting: Option<&str>,
    ) -> Result<i64, StoreError>;

    /// Fetches an application only if it is addressed to `to_user_id`.
    async fn find_apply(
        &self,
        apply_id: i64,
        to_user_id: i64,
    ) -> Result<Option<FriendApply>, StoreError>;

    async fn mark_apply_handled(&self, apply_id: i64, accepted: bool) -> Result<(), StoreError>;

    /// Records the friendship in both directions; re-adding is a no-op.
    async fn add_friendship(&self, user_id: i64, friend_user_id: i64) -> Result<(), StoreError>;

    async fn list_friends(&self, user_id: i64) -> Result<Vec<FriendEntry>, StoreError>;

    /// Removes both directions of the friendship.
    async fn delete_friendship(&self, user_id: i64, friend_user_id: i64)
        -> Result<(), StoreError>;

    async fn set_blocked(
        &self,
        user_id: i64,
        friend_user_id: i64,
        blocked: bool,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Creates the group row and returns its id. The caller is responsible
    /// for inserting the owner membership.
    async fn create_group(
        &self,
        group_name: &str,
        owner_id: i64,
        avatar_url: Option<&str>,
    ) -> Result<i64, StoreError>;

    /// Adds a member; adding an existing member is a no-op.
    async fn add_member(
        &self,
        group_id: i64,
        user_id: i64,
        role: MemberRole,
    ) -> Result<(), StoreError>;

    async fn groups_for_user(&self, user_id: i64) -> Result<Vec<GroupEntry>, StoreError>;

    async fn group_info(&self, group_id: i64) -> Result<Option<GroupInfo>, StoreError>;

    async fn member_ids(&self, group_id: i64) -> Result<Vec<i64>, StoreError>;

    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool, StoreError>;

    async fn member_role(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<Option<MemberRole>, StoreError>;

    async fn list_members(&self, group_id: i64) -> Result<Vec<GroupMemberEntry>, StoreError>;

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<(), StoreError>;

    /// Deletes the membership rows and the group itself.
    async fn dismiss_group(&self, group_id: i64) -> Result<(), StoreError>;

    async fn update_group_info(
        &self,
        group_id: i64,
        group_name: Option<&str>,
        announcement: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// The aggregate handle the server state carries. One backend usually
/// implements all three traits; tests substitute in-memory doubles.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub friends: Arc<dyn FriendStore>,
    pub groups: Arc<dyn GroupStore>,
}

impl Stores {
    /// Wraps a single backend implementing all three store traits.
    pub fn from_backend<S>(backend: S) -> Self
    where
        S: UserStore + FriendStore + GroupStore + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            users: backend.clone(),
            friends: backend.clone(),
            groups: backend,
        }
    }
}
