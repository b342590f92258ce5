use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    DownloadRepo, DownloadToken, FileRecord, FileRepo, Session, SessionRepo, User, UserRepo,
    VerificationRepo, VerificationToken,
};
use crate::error::{AppError, AppResult};

/// Postgres-backed repository. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgRepo {
    pool: PgPool,
}

impl PgRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    role: String,
    email_verified: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            role: r.role.parse()?,
            email_verified: r.email_verified,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    token: String,
    user_id: Uuid,
    role: String,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl TryFrom<SessionRow> for Session {
    type Error = AppError;

    fn try_from(r: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            token: r.token,
            user_id: r.user_id,
            role: r.role.parse()?,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
        })
    }
}

#[derive(FromRow)]
struct VerificationRow {
    token: String,
    user_id: Uuid,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    consumed_at: Option<OffsetDateTime>,
}

impl From<VerificationRow> for VerificationToken {
    fn from(r: VerificationRow) -> Self {
        Self {
            token: r.token,
            user_id: r.user_id,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            consumed_at: r.consumed_at,
        }
    }
}

#[derive(FromRow)]
struct FileRow {
    id: Uuid,
    name: String,
    content_type: String,
    size_bytes: i64,
    uploaded_by: Uuid,
    uploaded_at: OffsetDateTime,
    storage_key: String,
    is_active: bool,
}

impl From<FileRow> for FileRecord {
    fn from(r: FileRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            uploaded_by: r.uploaded_by,
            uploaded_at: r.uploaded_at,
            storage_key: r.storage_key,
            is_active: r.is_active,
        }
    }
}

#[derive(FromRow)]
struct DownloadRow {
    token: String,
    file_id: Uuid,
    issued_to: Uuid,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    consumed_at: Option<OffsetDateTime>,
}

impl From<DownloadRow> for DownloadToken {
    fn from(r: DownloadRow) -> Self {
        Self {
            token: r.token,
            file_id: r.file_id,
            issued_to: r.issued_to,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            consumed_at: r.consumed_at,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let res = sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, role, email_verified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateEmail),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, password_hash, role, email_verified, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, password_hash, role, email_verified, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }
}

#[async_trait]
impl SessionRepo for PgRepo {
    async fn insert_session(&self, session: &Session) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, user_id, role, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.role.as_str())
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> AppResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT token, user_id, role, issued_at, expires_at FROM sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn delete_session(&self, token: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired_sessions(&self, cutoff: OffsetDateTime) -> AppResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl VerificationRepo for PgRepo {
    async fn replace_verification_token(&self, token: &VerificationToken) -> AppResult<()> {
        // user_id is UNIQUE, so the upsert leaves one outstanding token per user.
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (token, user_id, issued_at, expires_at, consumed_at)
            VALUES ($1, $2, $3, $4, NULL)
            ON CONFLICT (user_id) DO UPDATE
               SET token = EXCLUDED.token,
                   issued_at = EXCLUDED.issued_at,
                   expires_at = EXCLUDED.expires_at,
                   consumed_at = NULL
            "#,
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_verification_token(&self, token: &str) -> AppResult<Option<VerificationToken>> {
        let row = sqlx::query_as::<_, VerificationRow>(
            r#"
            SELECT token, user_id, issued_at, expires_at, consumed_at
            FROM verification_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn redeem_verification_token(&self, token: &str, now: OffsetDateTime) -> AppResult<bool> {
        // Dropping `tx` without commit rolls the claim back.
        let mut tx = self.pool.begin().await?;

        let user_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE verification_tokens
               SET consumed_at = $2
             WHERE token = $1 AND consumed_at IS NULL
            RETURNING user_id
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        let res = sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            return Err(AppError::NotFound("user"));
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn purge_expired_verification_tokens(&self, cutoff: OffsetDateTime) -> AppResult<u64> {
        let res = sqlx::query("DELETE FROM verification_tokens WHERE expires_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl FileRepo for PgRepo {
    async fn insert_file(&self, file: &FileRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files
                (id, name, content_type, size_bytes, uploaded_by, uploaded_at, storage_key, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(&file.content_type)
        .bind(file.size_bytes)
        .bind(file.uploaded_by)
        .bind(file.uploaded_at)
        .bind(&file.storage_key)
        .bind(file.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_file(&self, id: Uuid) -> AppResult<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT id, name, content_type, size_bytes, uploaded_by, uploaded_at, storage_key, is_active
            FROM files
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_active_files(&self) -> AppResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT id, name, content_type, size_bytes, uploaded_by, uploaded_at, storage_key, is_active
            FROM files
            WHERE is_active
            ORDER BY uploaded_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn deactivate_file(&self, id: Uuid) -> AppResult<bool> {
        let res = sqlx::query("UPDATE files SET is_active = FALSE WHERE id = $1 AND is_active")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl DownloadRepo for PgRepo {
    async fn insert_download_token(&self, token: &DownloadToken) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO download_tokens (token, file_id, issued_to, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token)
        .bind(token.file_id)
        .bind(token.issued_to)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_download_token(&self, token: &str) -> AppResult<Option<DownloadToken>> {
        let row = sqlx::query_as::<_, DownloadRow>(
            r#"
            SELECT token, file_id, issued_to, issued_at, expires_at, consumed_at
            FROM download_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn claim_download_token(&self, token: &str, now: OffsetDateTime) -> AppResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE download_tokens
               SET consumed_at = $2
             WHERE token = $1 AND consumed_at IS NULL
            "#,
        )
        .bind(token)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn purge_expired_download_tokens(&self, cutoff: OffsetDateTime) -> AppResult<u64> {
        let res = sqlx::query("DELETE FROM download_tokens WHERE expires_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
