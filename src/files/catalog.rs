use anyhow::Context;
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::content_type;
use crate::{
    error::{AppError, AppResult},
    repo::{FileRecord, FileRepo, Role, Session},
    state::AppState,
};

const MAX_NAME_LEN: usize = 255;

pub struct UploadItem {
    pub name: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Keeps the last path component and bounds the length.
fn clean_name(raw: &str) -> AppResult<String> {
    let base = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() {
        return Err(AppError::Validation("file name is required".into()));
    }
    Ok(base.chars().take(MAX_NAME_LEN).collect())
}

/// Stores an upload from an operations session. Every rejection happens before
/// anything is written.
#[instrument(skip(st, session, item), fields(user_id = %session.user_id, name = %item.name))]
pub async fn record(st: &AppState, session: &Session, item: UploadItem) -> AppResult<FileRecord> {
    if session.role != Role::Operations {
        warn!("upload by non-operations session");
        return Err(AppError::Forbidden("only operations users can upload files"));
    }

    let ct = content_type::normalize(&item.content_type);
    let Some(ext) = content_type::ext_from_mime(&ct) else {
        warn!(content_type = %ct, "unsupported upload type");
        return Err(AppError::UnsupportedType(ct));
    };

    let limit = st.config.max_upload_bytes;
    if item.body.len() > limit {
        return Err(AppError::PayloadTooLarge { limit });
    }
    if item.body.is_empty() {
        return Err(AppError::Validation("file is empty".into()));
    }
    let name = clean_name(&item.name)?;

    let id = Uuid::new_v4();
    let storage_key = format!("files/{}/{}.{}", session.user_id, id, ext);
    let record = FileRecord {
        id,
        name,
        content_type: ct,
        size_bytes: item.body.len() as i64,
        uploaded_by: session.user_id,
        uploaded_at: OffsetDateTime::now_utc(),
        storage_key,
        is_active: true,
    };

    st.storage
        .put_object(&record.storage_key, item.body, &record.content_type)
        .await
        .with_context(|| format!("put_object {}", record.storage_key))?;

    if let Err(e) = st.repo.insert_file(&record).await {
        if let Err(cleanup) = st.storage.delete_object(&record.storage_key).await {
            error!(error = %cleanup, key = %record.storage_key, "orphaned object after failed insert");
        }
        return Err(e);
    }

    info!(file_id = %record.id, size = record.size_bytes, "file uploaded");
    Ok(record)
}

/// Active files, newest first.
pub async fn list(st: &AppState) -> AppResult<Vec<FileRecord>> {
    st.repo.list_active_files().await
}

pub async fn get(st: &AppState, id: Uuid) -> AppResult<FileRecord> {
    st.repo
        .find_file(id)
        .await?
        .filter(|f| f.is_active)
        .ok_or(AppError::NotFound("file"))
}

/// Soft delete by the uploading operations user. Stored bytes are kept.
#[instrument(skip(st, session), fields(user_id = %session.user_id))]
pub async fn deactivate(st: &AppState, session: &Session, id: Uuid) -> AppResult<()> {
    if session.role != Role::Operations {
        return Err(AppError::Forbidden("only operations users can delete files"));
    }
    let file = get(st, id).await?;
    if file.uploaded_by != session.user_id {
        return Err(AppError::Forbidden("only the uploader can delete this file"));
    }
    if !st.repo.deactivate_file(id).await? {
        return Err(AppError::NotFound("file"));
    }
    info!(file_id = %id, "file deactivated");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use time::Duration;

    pub(crate) fn session(role: Role) -> Session {
        let now = OffsetDateTime::now_utc();
        Session {
            token: crate::token::generate(),
            user_id: Uuid::new_v4(),
            role,
            issued_at: now,
            expires_at: now + Duration::minutes(5),
        }
    }

    pub(crate) fn upload(name: &str, ct: &str) -> UploadItem {
        UploadItem {
            name: name.into(),
            content_type: ct.into(),
            body: Bytes::from_static(b"PK\x03\x04 office bytes"),
        }
    }

    #[test]
    fn clean_name_drops_directories() {
        assert_eq!(clean_name("../../etc/deck.pptx").unwrap(), "deck.pptx");
        assert_eq!(clean_name("C:\\Users\\me\\sheet.xlsx").unwrap(), "sheet.xlsx");
        assert!(clean_name("  ").is_err());
    }

    #[tokio::test]
    async fn pptx_is_accepted_and_pdf_leaves_store_unchanged() {
        let st = AppState::fake();
        let ops = session(Role::Operations);

        let rec = record(&st, &ops, upload("deck.pptx", content_type::PPTX))
            .await
            .unwrap();
        assert_eq!(rec.uploaded_by, ops.user_id);
        assert!(rec.storage_key.ends_with(".pptx"));
        assert!(st.storage.get_object(&rec.storage_key).await.unwrap().is_some());

        let err = record(&st, &ops, upload("scan.pdf", "application/pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedType(_)));

        let files = list(&st).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, rec.id);
    }

    #[tokio::test]
    async fn clients_cannot_upload() {
        let st = AppState::fake();
        let err = record(&st, &session(Role::Client), upload("a.docx", content_type::DOCX))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(list(&st).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let st = AppState::fake();
        let mut item = upload("big.xlsx", content_type::XLSX);
        item.body = Bytes::from(vec![0u8; st.config.max_upload_bytes + 1]);
        let err = record(&st, &session(Role::Operations), item).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));
        assert!(list(&st).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let st = AppState::fake();
        let mut item = upload("blank.docx", content_type::DOCX);
        item.body = Bytes::new();
        let err = record(&st, &session(Role::Operations), item).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(list(&st).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let st = AppState::fake();
        let ops = session(Role::Operations);
        let first = record(&st, &ops, upload("one.docx", content_type::DOCX)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = record(&st, &ops, upload("two.xlsx", content_type::XLSX)).await.unwrap();

        let ids: Vec<Uuid> = list(&st).await.unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn only_the_uploader_can_deactivate() {
        let st = AppState::fake();
        let owner = session(Role::Operations);
        let other = session(Role::Operations);
        let rec = record(&st, &owner, upload("deck.pptx", content_type::PPTX)).await.unwrap();

        assert!(matches!(
            deactivate(&st, &other, rec.id).await.unwrap_err(),
            AppError::Forbidden(_)
        ));
        deactivate(&st, &owner, rec.id).await.unwrap();
        assert!(matches!(get(&st, rec.id).await.unwrap_err(), AppError::NotFound(_)));
        assert!(list(&st).await.unwrap().is_empty());
    }
}
