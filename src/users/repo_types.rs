use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Store-assigned user identifier (`BIGSERIAL`).
pub type UserId = i64;

/// User row as seen by every read path. The credential hash is never selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub profile_picture_url: Option<String>,
    pub bio: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub deleted_at: Option<OffsetDateTime>,
}

/// Insert payload. `password_hash` is already transformed by the hasher.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub profile_picture_url: Option<String>,
    pub bio: Option<String>,
}

/// Mutable columns touched by an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserChanges {
    pub username: String,
    pub email: String,
    pub profile_picture_url: Option<String>,
    pub bio: Option<String>,
}

