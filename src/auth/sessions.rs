use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::credentials;
use crate::{
    error::{AppError, AppResult},
    repo::{Role, Session, SessionRepo, User},
    state::AppState,
    token,
};

/// Authenticates and opens a session. The session role is the stored account
/// role; `asserted_role` can only cause a `RoleMismatch`, never grant a role.
#[instrument(skip(st, password))]
pub async fn login(
    st: &AppState,
    email: &str,
    password: &str,
    asserted_role: Option<Role>,
) -> AppResult<(Session, User)> {
    let user = credentials::verify(st, email, password).await?;

    if let Some(role) = asserted_role {
        if role != user.role {
            warn!(user_id = %user.id, asserted = %role, stored = %user.role, "role mismatch at login");
            return Err(AppError::RoleMismatch);
        }
    }

    if st.config.require_email_verification && !user.email_verified {
        warn!(user_id = %user.id, "login before email verification");
        return Err(AppError::EmailNotVerified);
    }

    let now = OffsetDateTime::now_utc();
    let session = Session {
        token: token::generate(),
        user_id: user.id,
        role: user.role,
        issued_at: now,
        expires_at: now + st.config.ttl.session,
    };
    st.repo.insert_session(&session).await?;

    info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok((session, user))
}

/// Resolves a bearer token to a live session.
pub async fn validate(st: &AppState, token: &str) -> AppResult<Session> {
    let session = st
        .repo
        .find_session(token)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if session.is_expired_at(OffsetDateTime::now_utc()) {
        debug!(user_id = %session.user_id, "expired session presented");
        return Err(AppError::Unauthorized);
    }
    Ok(session)
}

/// Ends a session. Unknown tokens are ignored.
pub async fn logout(st: &AppState, token: &str) -> AppResult<()> {
    st.repo.delete_session(token).await?;
    debug!("session closed");
    Ok(())
}
