use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::sessions;
use crate::{
    error::AppError,
    repo::{Role, Session},
    state::AppState,
};

fn bearer_token(parts: &Parts) -> Option<Result<String, AppError>> {
    let header = parts.headers.get(AUTHORIZATION)?;
    let token = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized);
    Some(token)
}

/// A validated bearer session. Rejects with 401 when absent or invalid.
pub struct AuthSession(pub Session);

impl AuthSession {
    pub fn require_role(&self, role: Role, reason: &'static str) -> Result<(), AppError> {
        if self.0.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(reason))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)??;
        let session = sessions::validate(state, &token).await?;
        Ok(AuthSession(session))
    }
}

/// Like `AuthSession`, but a request without an Authorization header is
/// accepted as anonymous. A header that is present must still be valid.
pub struct MaybeSession(pub Option<Session>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            None => Ok(MaybeSession(None)),
            Some(token) => {
                let session = sessions::validate(state, &token?).await?;
                Ok(MaybeSession(Some(session)))
            }
        }
    }
}
