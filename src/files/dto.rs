use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::repo::FileRecord;

#[derive(Debug, Serialize)]
pub struct FileItem {
    pub id: Uuid,
    pub name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

impl From<FileRecord> for FileItem {
    fn from(f: FileRecord) -> Self {
        Self {
            id: f.id,
            name: f.name,
            content_type: f.content_type,
            size_bytes: f.size_bytes,
            uploaded_by: f.uploaded_by,
            uploaded_at: f.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub file: FileItem,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub count: usize,
    pub files: Vec<FileItem>,
}

#[derive(Debug, Serialize)]
pub struct DownloadTokenResponse {
    pub token: String,
    pub download_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}
