use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::catalog;
use crate::{
    error::{AppError, AppResult},
    repo::{DownloadRepo, DownloadToken, FileRecord, Role, Session},
    state::AppState,
    token,
};

/// Mints a one-time token for `file_id`, bound to the requesting client.
#[instrument(skip(st, session), fields(user_id = %session.user_id))]
pub async fn issue_download(
    st: &AppState,
    file_id: Uuid,
    session: &Session,
) -> AppResult<DownloadToken> {
    if session.role != Role::Client {
        return Err(AppError::Forbidden("only client users can download files"));
    }
    let file = catalog::get(st, file_id).await?;

    let now = OffsetDateTime::now_utc();
    let token = DownloadToken {
        token: token::generate(),
        file_id: file.id,
        issued_to: session.user_id,
        issued_at: now,
        expires_at: now + st.config.ttl.download,
        consumed_at: None,
    };
    st.repo.insert_download_token(&token).await?;

    info!(file_id = %file.id, "download token issued");
    Ok(token)
}

pub fn download_link(st: &AppState, token: &str) -> String {
    format!(
        "{}/api/v1/download/{}",
        st.config.public_base_url.trim_end_matches('/'),
        token
    )
}

/// Redeems a download token and returns the file with its bytes.
///
/// When `redeemer` is known it must be the user the token was issued to.
/// The bytes are read before the token is consumed, and consumption is a
/// single compare-and-set in the repository. Among concurrent redemptions of
/// one token exactly one gets the bytes; the others drop their copy and get
/// `AlreadyConsumed`.
#[instrument(skip_all)]
pub async fn redeem(
    st: &AppState,
    token: &str,
    redeemer: Option<Uuid>,
) -> AppResult<(FileRecord, Bytes)> {
    let record = st
        .repo
        .find_download_token(token)
        .await?
        .ok_or(AppError::NotFound("download token"))?;

    if let Some(user_id) = redeemer {
        if user_id != record.issued_to {
            warn!(user_id = %user_id, file_id = %record.file_id, "download token presented by another user");
            return Err(AppError::UserMismatch);
        }
    }
    if record.consumed_at.is_some() {
        return Err(AppError::AlreadyConsumed);
    }
    let now = OffsetDateTime::now_utc();
    if record.is_expired_at(now) {
        return Err(AppError::Expired);
    }

    let file = catalog::get(st, record.file_id).await?;

    // Bytes first: a storage failure must leave the token redeemable.
    let body = st.storage.get_object(&file.storage_key).await?.ok_or_else(|| {
        error!(file_id = %file.id, key = %file.storage_key, "file bytes missing from storage");
        AppError::NotFound("file content")
    })?;

    if !st.repo.claim_download_token(token, now).await? {
        return Err(AppError::AlreadyConsumed);
    }

    info!(file_id = %file.id, user_id = %record.issued_to, "file downloaded");
    Ok((file, body))
}
