use async_trait::async_trait;
use tracing::info;

/// Out-of-band delivery of verification links.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<()>;
}

/// Development mailer: writes the link to the log instead of sending mail.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<()> {
        info!(to = %to, link = %link, "verification link (log delivery)");
        Ok(())
    }
}

#[cfg(test)]
pub use outbox::Outbox;

#[cfg(test)]
mod outbox {
    use super::*;
    use tokio::sync::Mutex;

    /// Collects sent links so tests can read them back.
    #[derive(Default)]
    pub struct Outbox {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Mailer for Outbox {
        async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<()> {
            self.sent.lock().await.push((to.to_string(), link.to_string()));
            Ok(())
        }
    }
}
