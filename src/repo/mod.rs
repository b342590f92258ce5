//! Persistence seam. Services talk to `Repository`; `MemoryRepo` backs tests and
//! database-less runs, `PgRepo` backs production.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppResult;

mod memory;
mod postgres;
pub mod repo_types;

pub use memory::MemoryRepo;
pub use postgres::PgRepo;
pub use repo_types::{DownloadToken, FileRecord, Role, Session, User, VerificationToken};

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `AppError::DuplicateEmail` when the email is taken.
    async fn insert_user(&self, user: &User) -> AppResult<()>;
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>>;
}

#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn insert_session(&self, session: &Session) -> AppResult<()>;
    async fn find_session(&self, token: &str) -> AppResult<Option<Session>>;
    async fn delete_session(&self, token: &str) -> AppResult<()>;
    /// Deletes sessions with `expires_at <= cutoff`.
    async fn purge_expired_sessions(&self, cutoff: OffsetDateTime) -> AppResult<u64>;
}

#[async_trait]
pub trait VerificationRepo: Send + Sync {
    /// Stores `token` as the only outstanding token of its user.
    async fn replace_verification_token(&self, token: &VerificationToken) -> AppResult<()>;
    async fn find_verification_token(&self, token: &str) -> AppResult<Option<VerificationToken>>;
    /// Marks the token consumed and its user verified in one step. Returns
    /// `false` if the token was already consumed or is gone. Fails with
    /// `NotFound` when the user is missing, leaving the token untouched.
    async fn redeem_verification_token(&self, token: &str, now: OffsetDateTime) -> AppResult<bool>;
    /// Deletes tokens with `expires_at <= cutoff`.
    async fn purge_expired_verification_tokens(&self, cutoff: OffsetDateTime) -> AppResult<u64>;
}

#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn insert_file(&self, file: &FileRecord) -> AppResult<()>;
    /// Returns inactive records too.
    async fn find_file(&self, id: Uuid) -> AppResult<Option<FileRecord>>;
    /// Active records, newest first.
    async fn list_active_files(&self) -> AppResult<Vec<FileRecord>>;
    async fn deactivate_file(&self, id: Uuid) -> AppResult<bool>;
}

#[async_trait]
pub trait DownloadRepo: Send + Sync {
    async fn insert_download_token(&self, token: &DownloadToken) -> AppResult<()>;
    async fn find_download_token(&self, token: &str) -> AppResult<Option<DownloadToken>>;
    /// Marks the token consumed. Returns `false` if it was already consumed or is gone.
    async fn claim_download_token(&self, token: &str, now: OffsetDateTime) -> AppResult<bool>;
    /// Deletes tokens with `expires_at <= cutoff`.
    async fn purge_expired_download_tokens(&self, cutoff: OffsetDateTime) -> AppResult<u64>;
}

pub trait Repository: UserRepo + SessionRepo + VerificationRepo + FileRepo + DownloadRepo {}

impl<T> Repository for T where T: UserRepo + SessionRepo + VerificationRepo + FileRepo + DownloadRepo {}
