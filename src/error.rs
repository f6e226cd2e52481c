use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures raised by a `UserStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index over active rows rejected the statement.
    #[error("unique constraint violated ({})", .constraint.as_deref().unwrap_or("unknown"))]
    Duplicate { constraint: Option<String> },

    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            // 23505 = unique_violation
            if db.code().as_deref() == Some("23505") {
                return Self::Duplicate {
                    constraint: db.constraint().map(str::to_owned),
                };
            }
        }
        Self::Sqlx(e)
    }
}

/// Closed set of outcomes the user service reports to its callers.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid user id: {0:?}")]
    InvalidId(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("username or email already exists")]
    DuplicateIdentity,

    #[error("user not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl From<StoreError> for UserError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { .. } => Self::DuplicateIdentity,
            StoreError::Sqlx(source) => Self::Internal(source.into()),
        }
    }
}

/// Malformed or incomplete request bodies are input errors, not 422s.
impl From<JsonRejection> for UserError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl UserError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidId(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateIdentity => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidId(_) => "invalid_user_id",
            Self::Validation(_) => "validation_failed",
            Self::DuplicateIdentity => "username_or_email_exists",
            Self::NotFound => "user_not_found",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(details) => json!({ "error": self.code(), "details": details }),
            Self::Internal(e) => {
                error!(error = ?e, "internal error");
                json!({ "error": self.code() })
            }
            _ => json!({ "error": self.code() }),
        };
        (status, Json(body)).into_response()
    }
}
