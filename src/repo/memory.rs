use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    DownloadRepo, DownloadToken, FileRecord, FileRepo, Session, SessionRepo, User, UserRepo,
    VerificationRepo, VerificationToken,
};
use crate::error::{AppError, AppResult};

/// A single-use record. `consumed_at` can be set exactly once, which makes the
/// claim atomic without holding the table lock for writing.
struct Slot<T> {
    record: T,
    consumed_at: OnceLock<OffsetDateTime>,
}

impl<T> Slot<T> {
    fn new(record: T) -> Arc<Self> {
        Arc::new(Self {
            record,
            consumed_at: OnceLock::new(),
        })
    }

    fn claim(&self, now: OffsetDateTime) -> bool {
        self.consumed_at.set(now).is_ok()
    }
}

impl Slot<VerificationToken> {
    fn snapshot(&self) -> VerificationToken {
        VerificationToken {
            consumed_at: self.consumed_at.get().copied(),
            ..self.record.clone()
        }
    }
}

impl Slot<DownloadToken> {
    fn snapshot(&self) -> DownloadToken {
        DownloadToken {
            consumed_at: self.consumed_at.get().copied(),
            ..self.record.clone()
        }
    }
}

#[derive(Default)]
struct UserTable {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

#[derive(Default)]
struct VerificationTable {
    by_token: HashMap<String, Arc<Slot<VerificationToken>>>,
    by_user: HashMap<Uuid, String>,
}

/// Process-local repository.
#[derive(Default)]
pub struct MemoryRepo {
    users: RwLock<UserTable>,
    sessions: RwLock<HashMap<String, Session>>,
    verification: RwLock<VerificationTable>,
    files: RwLock<HashMap<Uuid, FileRecord>>,
    downloads: RwLock<HashMap<String, Arc<Slot<DownloadToken>>>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryRepo {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let mut table = self.users.write().await;
        if table.by_email.contains_key(&user.email) {
            return Err(AppError::DuplicateEmail);
        }
        table.by_email.insert(user.email.clone(), user.id);
        table.by_id.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let table = self.users.read().await;
        Ok(table
            .by_email
            .get(email)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().await.by_id.get(&id).cloned())
    }
}

#[async_trait]
impl SessionRepo for MemoryRepo {
    async fn insert_session(&self, session: &Session) -> AppResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> AppResult<Option<Session>> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> AppResult<()> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    async fn purge_expired_sessions(&self, cutoff: OffsetDateTime) -> AppResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(cutoff));
        Ok((before - sessions.len()) as u64)
    }
}

#[async_trait]
impl VerificationRepo for MemoryRepo {
    async fn replace_verification_token(&self, token: &VerificationToken) -> AppResult<()> {
        let mut table = self.verification.write().await;
        if let Some(previous) = table.by_user.insert(token.user_id, token.token.clone()) {
            table.by_token.remove(&previous);
        }
        table
            .by_token
            .insert(token.token.clone(), Slot::new(token.clone()));
        Ok(())
    }

    async fn find_verification_token(&self, token: &str) -> AppResult<Option<VerificationToken>> {
        Ok(self
            .verification
            .read()
            .await
            .by_token
            .get(token)
            .map(|slot| slot.snapshot()))
    }

    async fn redeem_verification_token(&self, token: &str, now: OffsetDateTime) -> AppResult<bool> {
        let Some(slot) = self.verification.read().await.by_token.get(token).cloned() else {
            return Ok(false);
        };
        // Claim and flag under the users write lock.
        let mut users = self.users.write().await;
        let user = users
            .by_id
            .get_mut(&slot.record.user_id)
            .ok_or(AppError::NotFound("user"))?;
        if !slot.claim(now) {
            return Ok(false);
        }
        user.email_verified = true;
        Ok(true)
    }

    async fn purge_expired_verification_tokens(&self, cutoff: OffsetDateTime) -> AppResult<u64> {
        let mut table = self.verification.write().await;
        let expired: Vec<(String, Uuid)> = table
            .by_token
            .iter()
            .filter(|(_, slot)| slot.record.is_expired_at(cutoff))
            .map(|(token, slot)| (token.clone(), slot.record.user_id))
            .collect();
        for (token, user_id) in &expired {
            table.by_token.remove(token);
            if table.by_user.get(user_id) == Some(token) {
                table.by_user.remove(user_id);
            }
        }
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl FileRepo for MemoryRepo {
    async fn insert_file(&self, file: &FileRecord) -> AppResult<()> {
        self.files.write().await.insert(file.id, file.clone());
        Ok(())
    }

    async fn find_file(&self, id: Uuid) -> AppResult<Option<FileRecord>> {
        Ok(self.files.read().await.get(&id).cloned())
    }

    async fn list_active_files(&self) -> AppResult<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self
            .files
            .read()
            .await
            .values()
            .filter(|f| f.is_active)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
        Ok(files)
    }

    async fn deactivate_file(&self, id: Uuid) -> AppResult<bool> {
        let mut files = self.files.write().await;
        match files.get_mut(&id) {
            Some(file) if file.is_active => {
                file.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl DownloadRepo for MemoryRepo {
    async fn insert_download_token(&self, token: &DownloadToken) -> AppResult<()> {
        self.downloads
            .write()
            .await
            .insert(token.token.clone(), Slot::new(token.clone()));
        Ok(())
    }

    async fn find_download_token(&self, token: &str) -> AppResult<Option<DownloadToken>> {
        Ok(self
            .downloads
            .read()
            .await
            .get(token)
            .map(|slot| slot.snapshot()))
    }

    async fn claim_download_token(&self, token: &str, now: OffsetDateTime) -> AppResult<bool> {
        let slot = self.downloads.read().await.get(token).cloned();
        Ok(slot.map(|s| s.claim(now)).unwrap_or(false))
    }

    async fn purge_expired_download_tokens(&self, cutoff: OffsetDateTime) -> AppResult<u64> {
        let mut downloads = self.downloads.write().await;
        let before = downloads.len();
        downloads.retain(|_, slot| !slot.record.is_expired_at(cutoff));
        Ok((before - downloads.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::Role;
    use time::Duration;

    fn user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::Client,
            email_verified: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn verification(user_id: Uuid, token: &str, ttl: Duration) -> VerificationToken {
        let now = OffsetDateTime::now_utc();
        VerificationToken {
            token: token.into(),
            user_id,
            issued_at: now,
            expires_at: now + ttl,
            consumed_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let repo = MemoryRepo::new();
        repo.insert_user(&user("a@x.com")).await.unwrap();
        let err = repo.insert_user(&user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateEmail));
    }

    #[tokio::test]
    async fn replacing_verification_token_drops_the_previous_one() {
        let repo = MemoryRepo::new();
        let user_id = Uuid::new_v4();
        repo.replace_verification_token(&verification(user_id, "first", Duration::minutes(5)))
            .await
            .unwrap();
        repo.replace_verification_token(&verification(user_id, "second", Duration::minutes(5)))
            .await
            .unwrap();

        assert!(repo.find_verification_token("first").await.unwrap().is_none());
        assert!(repo.find_verification_token("second").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn redeem_succeeds_once_and_flags_the_user() {
        let repo = MemoryRepo::new();
        let u = user("a@x.com");
        repo.insert_user(&u).await.unwrap();
        repo.replace_verification_token(&verification(u.id, "t", Duration::minutes(5)))
            .await
            .unwrap();
        let now = OffsetDateTime::now_utc();
        assert!(repo.redeem_verification_token("t", now).await.unwrap());
        assert!(!repo.redeem_verification_token("t", now).await.unwrap());
        let stored = repo.find_verification_token("t").await.unwrap().unwrap();
        assert_eq!(stored.consumed_at, Some(now));
        assert!(repo.find_user(u.id).await.unwrap().unwrap().email_verified);
        assert!(!repo.redeem_verification_token("missing", now).await.unwrap());
    }

    #[tokio::test]
    async fn redeem_for_missing_user_leaves_token_unconsumed() {
        let repo = MemoryRepo::new();
        repo.replace_verification_token(&verification(Uuid::new_v4(), "t", Duration::minutes(5)))
            .await
            .unwrap();
        let err = repo
            .redeem_verification_token("t", OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
        let stored = repo.find_verification_token("t").await.unwrap().unwrap();
        assert!(stored.consumed_at.is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_tokens() {
        let repo = MemoryRepo::new();
        repo.replace_verification_token(&verification(Uuid::new_v4(), "old", Duration::ZERO))
            .await
            .unwrap();
        repo.replace_verification_token(&verification(Uuid::new_v4(), "new", Duration::minutes(5)))
            .await
            .unwrap();

        let purged = repo
            .purge_expired_verification_tokens(OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.find_verification_token("new").await.unwrap().is_some());
    }
}
