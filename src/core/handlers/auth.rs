// src/core/handlers/auth.rs

//! Login and registration. These are the only payload-carrying operations
//! an unauthenticated connection may perform.

use crate::core::protocol::MessageKind;
use crate::core::registry::SessionId;
use crate::core::routing::ServerHandle;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

impl LoginResponse {
    fn failure(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            user_id: None,
            username: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub nickname: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub user_id: Option<String>,
}

impl RegisterResponse {
    fn failure(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            user_id: None,
        }
    }
}

pub async fn handle_login(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let req: LoginRequest = serde_json::from_slice(payload).unwrap_or_default();

    if req.username.is_empty() || req.password.is_empty() {
        server.send_json(
            session_id,
            MessageKind::LoginResponse,
            &LoginResponse::failure("用户名或密码不能为空"),
        );
        return;
    }

    let verified = match server
        .stores()
        .users
        .verify_user(&req.username, &req.password)
        .await
    {
        Ok(v) => v,
        Err(e) => {
            error!(session_id, username = %req.username, "login verification failed: {e}");
            server.send_json(
                session_id,
                MessageKind::LoginResponse,
                &LoginResponse::failure("服务器内部错误，请稍后重试"),
            );
            return;
        }
    };

    match verified {
        Some(user) => {
            let user_id = user.user_id.to_string();
            // Authenticate first so the success response and the online
            // state become visible together.
            server.mark_authenticated(session_id, &user_id, &req.username, &user.nickname);
            info!(session_id, username = %req.username, user_id = %user_id, "login ok");
            server.send_json(
                session_id,
                MessageKind::LoginResponse,
                &LoginResponse {
                    success: true,
                    message: "登录成功".to_string(),
                    user_id: Some(user_id),
                    username: Some(req.username),
                },
            );
        }
        None => {
            warn!(session_id, username = %req.username, "login rejected");
            server.send_json(
                session_id,
                MessageKind::LoginResponse,
                &LoginResponse::failure("用户名或密码错误"),
            );
        }
    }
}

pub async fn handle_register(server: &ServerHandle, session_id: SessionId, payload: &[u8]) {
    let req: RegisterRequest = serde_json::from_slice(payload).unwrap_or_default();

    if req.username.is_empty() || req.password.is_empty() {
        server.send_json(
            session_id,
            MessageKind::RegisterResponse,
            &RegisterResponse::failure("用户名或密码不能为空"),
        );
        return;
    }

    let nickname = (!req.nickname.is_empty()).then_some(req.nickname.as_str());
    match server
        .stores()
        .users
        .register_user(&req.username, &req.password, nickname)
        .await
    {
        Ok(id) => {
            let user_id = id.to_string();
            // Registration logs the user straight in.
            server.mark_authenticated(session_id, &user_id, &req.username, &req.nickname);
            info!(session_id, username = %req.username, user_id = %user_id, "registered");
            server.send_json(
                session_id,
                MessageKind::RegisterResponse,
                &RegisterResponse {
                    success: true,
                    message: "注册成功".to_string(),
                    user_id: Some(user_id),
                },
            );
        }
        Err(StoreError::UsernameTaken) => {
            warn!(session_id, username = %req.username, "registration rejected: username taken");
            server.send_json(
                session_id,
                MessageKind::RegisterResponse,
                &RegisterResponse::failure("用户名已存在"),
            );
        }
        Err(e) => {
            error!(session_id, username = %req.username, "registration failed: {e}");
            server.send_json(
                session_id,
                MessageKind::RegisterResponse,
                &RegisterResponse::failure("注册失败，请稍后重试"),
            );
        }
    }
}
