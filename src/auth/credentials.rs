use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::password::{hash_password, verify_dummy, verify_password};
use crate::{
    config::OperationsSeed,
    error::{AppError, AppResult},
    repo::{Role, User, UserRepo},
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Creates an account. The password is hashed before it reaches the repository.
#[instrument(skip(st, password))]
pub async fn create(
    st: &AppState,
    email: &str,
    password: &str,
    role: Role,
    email_verified: bool,
) -> AppResult<User> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AppError::Validation("invalid email".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let password_hash = hash_password(password)?;
    let user = User {
        id: Uuid::new_v4(),
        email,
        password_hash,
        role,
        email_verified,
        created_at: OffsetDateTime::now_utc(),
    };
    st.repo.insert_user(&user).await?;

    info!(user_id = %user.id, role = %user.role, "user created");
    Ok(user)
}

/// Checks email and password. Unknown email and wrong password are indistinguishable.
#[instrument(skip(st, password))]
pub async fn verify(st: &AppState, email: &str, password: &str) -> AppResult<User> {
    let email = normalize_email(email);
    let Some(user) = st.repo.find_user_by_email(&email).await? else {
        verify_dummy(password);
        warn!("login for unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "invalid password");
        return Err(AppError::InvalidCredentials);
    }
    Ok(user)
}

pub async fn find(st: &AppState, id: Uuid) -> AppResult<User> {
    st.repo
        .find_user(id)
        .await?
        .ok_or(AppError::NotFound("user"))
}

/// Makes sure the configured operations account exists. Existing accounts are left alone.
pub async fn ensure_operations_account(st: &AppState, seed: &OperationsSeed) -> AppResult<()> {
    match create(st, &seed.email, &seed.password, Role::Operations, true).await {
        Ok(_) => Ok(()),
        Err(AppError::DuplicateEmail) => {
            let existing = st.repo.find_user_by_email(&normalize_email(&seed.email)).await?;
            if let Some(user) = existing.filter(|u| u.role != Role::Operations) {
                warn!(user_id = %user.id, "seeded operations email belongs to a client account");
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@x.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn create_normalizes_and_rejects_duplicates() {
        let st = AppState::fake();
        let user = create(&st, "  A@X.com ", "password1", Role::Client, false)
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");
        assert_ne!(user.password_hash, "password1");

        let err = create(&st, "a@x.com", "password2", Role::Client, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateEmail));
    }

    #[tokio::test]
    async fn create_rejects_short_password() {
        let st = AppState::fake();
        let err = create(&st, "a@x.com", "short", Role::Client, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn verify_hides_which_part_was_wrong() {
        let st = AppState::fake();
        create(&st, "a@x.com", "password1", Role::Client, false)
            .await
            .unwrap();

        assert!(verify(&st, "a@x.com", "password1").await.is_ok());
        assert!(matches!(
            verify(&st, "a@x.com", "wrong-pass").await.unwrap_err(),
            AppError::InvalidCredentials
        ));
        assert!(matches!(
            verify(&st, "nobody@x.com", "password1").await.unwrap_err(),
            AppError::InvalidCredentials
        ));
    }

    #[tokio::test]
    async fn operations_seed_is_idempotent() {
        let st = AppState::fake();
        let seed = OperationsSeed {
            email: "ops@x.com".into(),
            password: "ops-password".into(),
        };
        ensure_operations_account(&st, &seed).await.unwrap();
        ensure_operations_account(&st, &seed).await.unwrap();

        let user = verify(&st, "ops@x.com", "ops-password").await.unwrap();
        assert_eq!(user.role, Role::Operations);
        assert!(user.email_verified);
    }
}
