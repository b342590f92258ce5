use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::credentials::{self, normalize_email};
use crate::{
    error::{AppError, AppResult},
    repo::{User, UserRepo, VerificationRepo, VerificationToken},
    state::AppState,
    token,
};

/// Issues a fresh token for `user_id`, invalidating any earlier one.
pub async fn issue(st: &AppState, user_id: Uuid) -> AppResult<VerificationToken> {
    let now = OffsetDateTime::now_utc();
    let token = VerificationToken {
        token: token::generate(),
        user_id,
        issued_at: now,
        expires_at: now + st.config.ttl.verification,
        consumed_at: None,
    };
    st.repo.replace_verification_token(&token).await?;
    debug!(user_id = %user_id, "verification token issued");
    Ok(token)
}

pub fn verification_link(st: &AppState, token: &str) -> String {
    format!(
        "{}/api/v1/auth/verify/{}",
        st.config.public_base_url.trim_end_matches('/'),
        token
    )
}

/// Issues a token and hands the link to the mailer.
pub async fn issue_and_send(st: &AppState, user: &User) -> AppResult<VerificationToken> {
    let token = issue(st, user.id).await?;
    st.mailer
        .send_verification(&user.email, &verification_link(st, &token.token))
        .await?;
    Ok(token)
}

/// Consumes a token and marks its user verified. Of several concurrent
/// redemptions exactly one succeeds; the others see `AlreadyConsumed`.
#[instrument(skip_all)]
pub async fn redeem(st: &AppState, token: &str) -> AppResult<User> {
    let record = st
        .repo
        .find_verification_token(token)
        .await?
        .ok_or(AppError::NotFound("verification token"))?;

    if record.consumed_at.is_some() {
        return Err(AppError::AlreadyConsumed);
    }
    let now = OffsetDateTime::now_utc();
    if record.is_expired_at(now) {
        return Err(AppError::Expired);
    }
    if !st.repo.redeem_verification_token(token, now).await? {
        return Err(AppError::AlreadyConsumed);
    }

    let user = credentials::find(st, record.user_id).await?;
    info!(user_id = %user.id, "email verified");
    Ok(user)
}

/// Re-sends a link to an unverified account. Unknown and already verified
/// addresses are accepted silently.
#[instrument(skip(st))]
pub async fn resend(st: &AppState, email: &str) -> AppResult<()> {
    match st.repo.find_user_by_email(&normalize_email(email)).await? {
        Some(user) if !user.email_verified => {
            issue_and_send(st, &user).await?;
        }
        Some(_) => debug!("resend for verified account ignored"),
        None => warn!("resend for unknown email ignored"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, repo::Role};
    use time::Duration;

    async fn client(st: &AppState) -> User {
        credentials::create(st, "a@x.com", "password1", Role::Client, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn redeem_twice_reports_already_consumed() {
        let st = AppState::fake();
        let user = client(&st).await;
        let t = issue(&st, user.id).await.unwrap();

        let verified = redeem(&st, &t.token).await.unwrap();
        assert!(verified.email_verified);

        let err = redeem(&st, &t.token).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyConsumed));
    }

    #[tokio::test]
    async fn only_the_latest_token_is_outstanding() {
        let st = AppState::fake();
        let user = client(&st).await;
        let first = issue(&st, user.id).await.unwrap();
        let second = issue(&st, user.id).await.unwrap();

        assert!(matches!(
            redeem(&st, &first.token).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(redeem(&st, &second.token).await.is_ok());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let mut cfg = AppConfig::for_tests();
        cfg.ttl.verification = Duration::ZERO;
        let (st, _) = AppState::fake_with(cfg);
        let user = client(&st).await;
        let t = issue(&st, user.id).await.unwrap();

        assert!(matches!(redeem(&st, &t.token).await.unwrap_err(), AppError::Expired));
        let stored = credentials::find(&st, user.id).await.unwrap();
        assert!(!stored.email_verified);
    }

    #[tokio::test]
    async fn failed_redeem_can_be_retried() {
        let st = AppState::fake();
        // No account behind this id, so marking the user fails.
        let t = issue(&st, Uuid::new_v4()).await.unwrap();

        assert!(matches!(
            redeem(&st, &t.token).await.unwrap_err(),
            AppError::NotFound("user")
        ));
        let stored = st.repo.find_verification_token(&t.token).await.unwrap().unwrap();
        assert!(stored.consumed_at.is_none());
        assert!(matches!(
            redeem(&st, &t.token).await.unwrap_err(),
            AppError::NotFound("user")
        ));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let st = AppState::fake();
        assert!(matches!(
            redeem(&st, "nope").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemptions_have_one_winner() {
        let st = AppState::fake();
        let user = client(&st).await;
        let t = issue(&st, user.id).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let st = st.clone();
                let token = t.token.clone();
                tokio::spawn(async move { redeem(&st, &token).await })
            })
            .collect();

        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AppError::AlreadyConsumed) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn resend_delivers_a_new_link_to_unverified_accounts_only() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        let user = client(&st).await;

        resend(&st, "A@x.com").await.unwrap();
        resend(&st, "ghost@x.com").await.unwrap();
        {
            let sent = outbox.sent.lock().await;
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, "a@x.com");
            assert!(sent[0].1.starts_with("http://test.local/api/v1/auth/verify/"));
        }

        let t = issue(&st, user.id).await.unwrap();
        redeem(&st, &t.token).await.unwrap();
        resend(&st, "a@x.com").await.unwrap();
        assert_eq!(outbox.sent.lock().await.len(), 1);
    }
}
