use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::{
    error::AppResult,
    repo::{DownloadRepo, SessionRepo, VerificationRepo},
    state::AppState,
};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub verification_tokens: u64,
    pub download_tokens: u64,
}

/// Deletes expired sessions and tokens. Expiry is enforced at check time
/// regardless; this only reclaims space. Tokens are kept for the retention
/// window after expiry so a late redemption reports `Expired`, not `NotFound`.
pub async fn sweep_once(st: &AppState, now: OffsetDateTime) -> AppResult<SweepReport> {
    let token_cutoff = now - st.config.expired_token_retention;
    Ok(SweepReport {
        sessions: st.repo.purge_expired_sessions(now).await?,
        verification_tokens: st
            .repo
            .purge_expired_verification_tokens(token_cutoff)
            .await?,
        download_tokens: st.repo.purge_expired_download_tokens(token_cutoff).await?,
    })
}

pub fn spawn(st: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(st.config.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match sweep_once(&st, OffsetDateTime::now_utc()).await {
                Ok(report) => debug!(?report, "expired records swept"),
                Err(e) => error!(error = %e, "sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{credentials, sessions},
        config::AppConfig,
        error::AppError,
        files::{
            access,
            catalog::{self, UploadItem},
            content_type,
        },
        repo::Role,
    };
    use bytes::Bytes;
    use time::Duration as TimeDuration;

    #[tokio::test]
    async fn sweep_purges_only_expired_sessions() {
        let st = AppState::fake();
        credentials::create(&st, "a@x.com", "password1", Role::Client, true)
            .await
            .unwrap();
        let (session, _) = sessions::login(&st, "a@x.com", "password1", None).await.unwrap();

        let report = sweep_once(&st, OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(sessions::validate(&st, &session.token).await.is_ok());

        let later = OffsetDateTime::now_utc() + TimeDuration::hours(1);
        let report = sweep_once(&st, later).await.unwrap();
        assert_eq!(report.sessions, 1);
    }

    #[tokio::test]
    async fn expired_download_token_outlives_a_sweep_until_retention_ends() {
        let mut cfg = AppConfig::for_tests();
        cfg.ttl.download = TimeDuration::ZERO;
        let (st, _) = AppState::fake_with(cfg);
        let ops = credentials::create(&st, "ops@x.com", "password1", Role::Operations, true)
            .await
            .unwrap();
        let client = credentials::create(&st, "c@x.com", "password1", Role::Client, true)
            .await
            .unwrap();
        let (ops_session, _) = sessions::login(&st, &ops.email, "password1", None).await.unwrap();
        let (client_session, _) = sessions::login(&st, &client.email, "password1", None)
            .await
            .unwrap();

        let file = catalog::record(
            &st,
            &ops_session,
            UploadItem {
                name: "deck.pptx".into(),
                content_type: content_type::PPTX.into(),
                body: Bytes::from_static(b"slides"),
            },
        )
        .await
        .unwrap();
        let t = access::issue_download(&st, file.id, &client_session).await.unwrap();

        let report = sweep_once(&st, OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(report.download_tokens, 0);
        assert!(matches!(
            access::redeem(&st, &t.token, Some(client.id)).await.unwrap_err(),
            AppError::Expired
        ));

        let past_retention = OffsetDateTime::now_utc()
            + st.config.expired_token_retention
            + TimeDuration::seconds(1);
        let report = sweep_once(&st, past_retention).await.unwrap();
        assert_eq!(report.download_tokens, 1);
    }
}
