use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("requested role does not match the account role")]
    RoleMismatch,

    #[error("email address is not verified")]
    EmailNotVerified,

    #[error("missing, expired or unknown session")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("token expired")]
    Expired,

    #[error("token already consumed")]
    AlreadyConsumed,

    #[error("token was issued to a different user")]
    UserMismatch,

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DuplicateEmail => StatusCode::CONFLICT,
            AppError::InvalidCredentials | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RoleMismatch
            | AppError::EmailNotVerified
            | AppError::Forbidden(_)
            | AppError::UserMismatch => StatusCode::FORBIDDEN,
            AppError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Expired => StatusCode::GONE,
            AppError::AlreadyConsumed => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code rendered as `error` in responses.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DuplicateEmail => "duplicate_email",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::RoleMismatch => "role_mismatch",
            AppError::EmailNotVerified => "email_not_verified",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::UnsupportedType(_) => "unsupported_type",
            AppError::PayloadTooLarge { .. } => "payload_too_large",
            AppError::NotFound(_) => "not_found",
            AppError::Expired => "expired",
            AppError::AlreadyConsumed => "already_consumed",
            AppError::UserMismatch => "user_mismatch",
            AppError::Validation(_) => "validation",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": self.code(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
