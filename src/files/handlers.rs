use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    access, catalog,
    catalog::UploadItem,
    content_type,
    dto::{DownloadTokenResponse, FileItem, FileListResponse, FileResponse},
};
use crate::{
    auth::extractors::{AuthSession, MaybeSession},
    error::{AppError, AppResult},
    repo::Role,
    state::AppState,
};

// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/files", get(list_files))
        .route("/files/:id", get(get_file))
        .route("/files/:id", delete(delete_file))
        .route("/files/:id/download-token", post(create_download_token))
        .route("/download/:token", get(download))
}

pub fn write_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/files", post(upload_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD))
}

fn multipart_error(e: MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::Validation(e.body_text())
    }
}

/// POST /files (multipart, field `file`)
#[instrument(skip(state, auth, mp))]
pub async fn upload_file(
    State(state): State<AppState>,
    auth: AuthSession,
    mut mp: Multipart,
) -> AppResult<(StatusCode, HeaderMap, Json<FileResponse>)> {
    // Reject before reading the body.
    auth.require_role(Role::Operations, "only operations users can upload files")?;
    let AuthSession(session) = auth;
    let limit = state.config.max_upload_bytes;

    let mut item = None;
    while let Some(field) = mp.next_field().await.map_err(|e| multipart_error(e, limit))? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let ct = match field.content_type() {
            Some(ct) => ct.to_string(),
            None => content_type::mime_from_name(&name)
                .unwrap_or("application/octet-stream")
                .to_string(),
        };
        let body = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        item = Some(UploadItem {
            name,
            content_type: ct,
            body,
        });
        break;
    }
    let item =
        item.ok_or_else(|| AppError::Validation("multipart field `file` is required".into()))?;

    let record = catalog::record(&state, &session, item).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/v1/files/{}", record.id)) {
        headers.insert(header::LOCATION, location);
    }
    Ok((
        StatusCode::CREATED,
        headers,
        Json(FileResponse { file: record.into() }),
    ))
}

#[instrument(skip_all)]
pub async fn list_files(
    State(state): State<AppState>,
    AuthSession(_session): AuthSession,
) -> AppResult<Json<FileListResponse>> {
    let files: Vec<FileItem> = catalog::list(&state)
        .await?
        .into_iter()
        .map(FileItem::from)
        .collect();
    Ok(Json(FileListResponse {
        count: files.len(),
        files,
    }))
}

#[instrument(skip(state, _session))]
pub async fn get_file(
    State(state): State<AppState>,
    AuthSession(_session): AuthSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<FileResponse>> {
    let file = catalog::get(&state, id).await?;
    Ok(Json(FileResponse { file: file.into() }))
}

#[instrument(skip(state, session))]
pub async fn delete_file(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    catalog::deactivate(&state, &session, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, session))]
pub async fn create_download_token(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DownloadTokenResponse>> {
    let token = access::issue_download(&state, id, &session).await?;
    Ok(Json(DownloadTokenResponse {
        download_url: access::download_link(&state, &token.token),
        token: token.token,
        expires_at: token.expires_at,
    }))
}

/// Header-safe rendition of a file name for `Content-Disposition`.
fn attachment_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

/// GET /download/:token. The token is the credential; a session, if sent, must match it.
#[instrument(skip_all)]
pub async fn download(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let redeemer = session.map(|s| s.user_id);
    let (file, body) = access::redeem(&state, &token, redeemer).await?;

    let content_type = HeaderValue::from_str(&file.content_type)
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        attachment_name(&file.name)
    ))
    .unwrap_or(HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_name_is_header_safe() {
        assert_eq!(attachment_name("Q3 \"final\".pptx"), "Q3 _final_.pptx");
        assert_eq!(attachment_name("résumé.docx"), "r_sum_.docx");
        assert!(HeaderValue::from_str(&attachment_name("a\r\nb.xlsx")).is_ok());
    }
}
