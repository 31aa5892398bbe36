// src/store/mysql.rs

//! MySQL implementation of the store traits over a single pooled
//! connection set. Every query uses bound parameters; the pool re-checks
//! connections before handing them out, which replaces any manual
//! reconnect logic.

use super::{
    FriendApply, FriendEntry, FriendStore, GroupEntry, GroupInfo, GroupMemberEntry, GroupStore,
    MemberRole, StoreError, UserStore, VerifiedUser,
};
use crate::config::DbConfig;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

/// Maximum connections kept in the pool. Store calls block handler tasks,
/// so this also bounds concurrent database work.
const POOL_MAX_CONNECTIONS: u32 = 16;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connects the pool and verifies the database is reachable. Startup
    /// aborts on failure; later outages surface per-query as `Unavailable`.
    pub async fn connect(cfg: &DbConfig) -> Result<Self, StoreError> {
        let options = MySqlConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.name)
            .charset("utf8mb4");

        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(
            host = %cfg.host,
            port = cfg.port,
            database = %cfg.name,
            "connected to MySQL"
        );
        Ok(Self { pool })
    }
}

/// Pool-level acquisition failures mean the database is gone, not that the
/// query was bad.
fn classify(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Query(other),
    }
}

#[async_trait]
impl UserStore for MySqlStore {
    async fn verify_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<VerifiedUser>, StoreError> {
        let row = sqlx::query("SELECT user_id, password, nickname FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let hash: String = row.try_get("password")?;
        if !bcrypt::verify(password, &hash).map_err(|e| StoreError::Hash(e.to_string()))? {
            return Ok(None);
        }

        let user_id: i64 = row.try_get("user_id")?;
        let nickname: Option<String> = row.try_get("nickname")?;
        Ok(Some(VerifiedUser {
            user_id,
            nickname: nickname.unwrap_or_else(|| username.to_string()),
        }))
    }

    async fn register_user(
        &self,
        username: &str,
        password: &str,
        nickname: Option<&str>,
    ) -> Result<i64, StoreError> {
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| StoreError::Hash(e.to_string()))?;

        let result = sqlx::query("INSERT INTO users (username, password, nickname) VALUES (?, ?, ?)")
            .bind(username)
            .bind(hash)
            .bind(nickname)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(done.last_insert_id() as i64),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::UsernameTaken)
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?
            .try_get(0)?;
        Ok(count > 0)
    }

    async fn find_user_id(&self, username: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT user_id FROM users WHERE username = ? LIMIT 1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(match row {
            Some(row) => Some(row.try_get("user_id")?),
            None => None,
        })
    }

    async fn user_id_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?
            .try_get(0)?;
        Ok(count > 0)
    }
}

#[async_trait]
impl FriendStore for MySqlStore {
    async fn are_friends(&self, user_id: i64, friend_user_id: i64) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) FROM friends WHERE user_id = ? AND friend_user_id = ?")
                .bind(user_id)
                .bind(friend_user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(classify)?
                .try_get(0)?;
        Ok(count > 0)
    }

    async fn create_apply(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        greeting: Option<&str>,
    ) -> Result<i64, StoreError> {
        let done = sqlx::query(
            "INSERT INTO friend_applies (from_user_id, to_user_id, greeting) VALUES (?, ?, ?)",
        )
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(greeting)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(done.last_insert_id() as i64)
    }

    async fn find_apply(
        &self,
        apply_id: i64,
        to_user_id: i64,
    ) -> Result<Option<FriendApply>, StoreError> {
        let row = sqlx::query(
            "SELECT apply_id, from_user_id, to_user_id, status \
             FROM friend_applies WHERE apply_id = ? AND to_user_id = ?",
        )
        .bind(apply_id)
        .bind(to_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(match row {
            Some(row) => Some(FriendApply {
                apply_id: row.try_get("apply_id")?,
                from_user_id: row.try_get("from_user_id")?,
                to_user_id: row.try_get("to_user_id")?,
                status: row.try_get("status")?,
            }),
            None => None,
        })
    }

    async fn mark_apply_handled(&self, apply_id: i64, accepted: bool) -> Result<(), StoreError> {
        let status: i8 = if accepted { 1 } else { 2 };
        sqlx::query("UPDATE friend_applies SET status = ?, handled_at = NOW() WHERE apply_id = ?")
            .bind(status)
            .bind(apply_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn add_friendship(&self, user_id: i64, friend_user_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT IGNORE INTO friends (user_id, friend_user_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(friend_user_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        sqlx::query("INSERT IGNORE INTO friends (user_id, friend_user_id) VALUES (?, ?)")
            .bind(friend_user_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn list_friends(&self, user_id: i64) -> Result<Vec<FriendEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT f.friend_user_id, f.remark, f.group_name, f.is_blocked, \
                    u.username, u.nickname \
             FROM friends f \
             JOIN users u ON f.friend_user_id = u.user_id \
             WHERE f.user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let username: String = row.try_get("username")?;
            let nickname: Option<String> = row.try_get("nickname")?;
            entries.push(FriendEntry {
                user_id: row.try_get("friend_user_id")?,
                nickname: nickname
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| username.clone()),
                username,
                remark: row.try_get::<Option<String>, _>("remark")?.unwrap_or_default(),
                group_name: row
                    .try_get::<Option<String>, _>("group_name")?
                    .unwrap_or_default(),
                is_blocked: row.try_get("is_blocked")?,
            });
        }
        Ok(entries)
    }

    async fn delete_friendship(
        &self,
        user_id: i64,
        friend_user_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM friends WHERE user_id = ? AND friend_user_id = ?")
            .bind(user_id)
            .bind(friend_user_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM friends WHERE user_id = ? AND friend_user_id = ?")
            .bind(friend_user_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn set_blocked(
        &self,
        user_id: i64,
        friend_user_id: i64,
        blocked: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE friends SET is_blocked = ? WHERE user_id = ? AND friend_user_id = ?")
            .bind(blocked)
            .bind(user_id)
            .bind(friend_user_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl GroupStore for MySqlStore {
    async fn create_group(
        &self,
        group_name: &str,
        owner_id: i64,
        avatar_url: Option<&str>,
    ) -> Result<i64, StoreError> {
        let done =
            sqlx::query("INSERT INTO `groups` (group_name, owner_id, avatar_url) VALUES (?, ?, ?)")
                .bind(group_name)
                .bind(owner_id)
                .bind(avatar_url)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        Ok(done.last_insert_id() as i64)
    }

    async fn add_member(
        &self,
        group_id: i64,
        user_id: i64,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT IGNORE INTO group_members (group_id, user_id, role) VALUES (?, ?, ?)")
            .bind(group_id)
            .bind(user_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn groups_for_user(&self, user_id: i64) -> Result<Vec<GroupEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT g.group_id, g.group_name, g.avatar_url, g.announcement, gm.role \
             FROM `groups` g \
             JOIN group_members gm ON g.group_id = gm.group_id \
             WHERE gm.user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role")?;
            entries.push(GroupEntry {
                group_id: row.try_get("group_id")?,
                group_name: row.try_get("group_name")?,
                avatar_url: row
                    .try_get::<Option<String>, _>("avatar_url")?
                    .unwrap_or_default(),
                announcement: row
                    .try_get::<Option<String>, _>("announcement")?
                    .filter(|a| !a.is_empty()),
                role: MemberRole::from_db(&role),
            });
        }
        Ok(entries)
    }

    async fn group_info(&self, group_id: i64) -> Result<Option<GroupInfo>, StoreError> {
        let row = sqlx::query(
            "SELECT group_id, group_name, owner_id, avatar_url, announcement, \
                    CAST(UNIX_TIMESTAMP(created_at) AS SIGNED) AS created_at \
             FROM `groups` WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(match row {
            Some(row) => Some(GroupInfo {
                group_id: row.try_get("group_id")?,
                group_name: row.try_get("group_name")?,
                owner_id: row.try_get("owner_id")?,
                avatar_url: row
                    .try_get::<Option<String>, _>("avatar_url")?
                    .unwrap_or_default(),
                announcement: row
                    .try_get::<Option<String>, _>("announcement")?
                    .filter(|a| !a.is_empty()),
                created_at: row.try_get("created_at")?,
            }),
            None => None,
        })
    }

    async fn member_ids(&self, group_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query("SELECT user_id FROM group_members WHERE group_id = ?")
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        rows.into_iter()
            .map(|row| row.try_get("user_id").map_err(StoreError::from))
            .collect()
    }

    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) FROM group_members WHERE group_id = ? AND user_id = ?")
                .bind(group_id)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(classify)?
                .try_get(0)?;
        Ok(count > 0)
    }

    async fn member_role(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> Result<Option<MemberRole>, StoreError> {
        let row =
            sqlx::query("SELECT role FROM group_members WHERE group_id = ? AND user_id = ?")
                .bind(group_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)?;
        Ok(match row {
            Some(row) => {
                let role: String = row.try_get("role")?;
                Some(MemberRole::from_db(&role))
            }
            None => None,
        })
    }

    async fn list_members(&self, group_id: i64) -> Result<Vec<GroupMemberEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT gm.user_id, gm.role, \
                    COALESCE(NULLIF(gm.nickname_in_group, ''), NULLIF(u.nickname, ''), u.username) \
                        AS display_name \
             FROM group_members gm \
             JOIN users u ON gm.user_id = u.user_id \
             WHERE gm.group_id = ?",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut members = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role")?;
            members.push(GroupMemberEntry {
                user_id: row.try_get("user_id")?,
                display_name: row.try_get("display_name")?,
                role: MemberRole::from_db(&role),
            });
        }
        Ok(members)
    }

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn dismiss_group(&self, group_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM `groups` WHERE group_id = ?")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update_group_info(
        &self,
        group_id: i64,
        group_name: Option<&str>,
        announcement: Option<&str>,
    ) -> Result<(), StoreError> {
        match (group_name, announcement) {
            (Some(name), Some(announcement)) => {
                sqlx::query(
                    "UPDATE `groups` SET group_name = ?, announcement = ? WHERE group_id = ?",
                )
                .bind(name)
                .bind(announcement)
                .bind(group_id)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
            }
            (Some(name), None) => {
                sqlx::query("UPDATE `groups` SET group_name = ? WHERE group_id = ?")
                    .bind(name)
                    .bind(group_id)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)?;
            }
            (None, Some(announcement)) => {
                sqlx::query("UPDATE `groups` SET announcement = ? WHERE group_id = ?")
                    .bind(announcement)
                    .bind(group_id)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)?;
            }
            (None, None) => {}
        }
        Ok(())
    }
}
