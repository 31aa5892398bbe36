// src/core/handlers/mod.rs

//! Business handlers, one module per message family. Handlers parse the
//! JSON payload, talk to the stores, and reply through the `ServerHandle`
//! routing primitives. Every failure becomes a response payload; the
//! connection itself survives anything a handler can produce.

pub mod auth;
pub mod friend;
pub mod group;
pub mod message;
pub mod user;

use crate::store::StoreError;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Message shown when the store is unreachable, regardless of operation.
const DB_UNAVAILABLE: &str = "服务器数据库未连接";

/// Payload of an ERROR frame.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_code: u16,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
}

impl ErrorBody {
    pub fn new(error_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            error_message: error_message.into(),
            to_user_id: None,
        }
    }

    /// The gate response for authenticated-only operations.
    pub fn not_logged_in() -> Self {
        Self::new(1001, "请先登录")
    }
}

/// `success:false` body for `*_RESPONSE` frames.
#[derive(Debug, Serialize)]
pub struct OpFailure {
    pub success: bool,
    pub error_code: u16,
    pub error_message: String,
}

impl OpFailure {
    pub fn new(error_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code,
            error_message: error_message.into(),
        }
    }
}

/// Maps a store failure onto a response body: unavailability is always
/// 5000; anything else gets the call site's query-failure code.
pub fn store_failure(err: &StoreError, error_code: u16, error_message: &str) -> OpFailure {
    match err {
        StoreError::Unavailable(_) => OpFailure::new(5000, DB_UNAVAILABLE),
        _ => OpFailure::new(error_code, error_message),
    }
}

/// Same mapping for operations that report failures as ERROR frames.
pub fn store_error(err: &StoreError, error_code: u16, error_message: &str) -> ErrorBody {
    match err {
        StoreError::Unavailable(_) => ErrorBody::new(5000, DB_UNAVAILABLE),
        _ => ErrorBody::new(error_code, error_message),
    }
}

/// Wall-clock seconds since the epoch, as carried in wire timestamps.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Deserializes an id field that clients send either quoted (`"42"`) or
/// bare (`42`). Missing and null both yield the empty string, which the
/// handlers reject with the field-specific error code.
pub fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Text(String),
        Number(i64),
    }

    Ok(match Option::<IdRepr>::deserialize(deserializer)? {
        Some(IdRepr::Text(s)) => s,
        Some(IdRepr::Number(n)) => n.to_string(),
        None => String::new(),
    })
}
