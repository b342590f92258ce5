use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::mailer::{LogMailer, Mailer};
use crate::repo::{MemoryRepo, PgRepo, Repository};
use crate::storage::{MemoryStorage, Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Arc<dyn Repository>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let repo = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                let repo = PgRepo::new(pool);
                repo.migrate().await?;
                info!("postgres repository ready");
                Arc::new(repo) as Arc<dyn Repository>
            }
            None => {
                warn!("DATABASE_URL not set; records are kept in memory only");
                Arc::new(MemoryRepo::new()) as Arc<dyn Repository>
            }
        };

        let storage = match &config.storage {
            Some(cfg) => {
                info!(endpoint = %cfg.endpoint, bucket = %cfg.bucket, "s3 storage configured");
                Arc::new(Storage::new(cfg).await?) as Arc<dyn StorageClient>
            }
            None => {
                warn!("MINIO_ENDPOINT not set; file bytes are kept in memory only");
                Arc::new(MemoryStorage::new()) as Arc<dyn StorageClient>
            }
        };

        Ok(Self::from_parts(config, repo, storage, Arc::new(LogMailer)))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        repo: Arc<dyn Repository>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            repo,
            storage,
            mailer,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory state with test settings.
    pub fn fake() -> Self {
        Self::fake_with(AppConfig::for_tests()).0
    }

    /// In-memory state with custom settings; the outbox receives verification links.
    pub fn fake_with(config: AppConfig) -> (Self, Arc<crate::mailer::Outbox>) {
        let outbox = Arc::new(crate::mailer::Outbox::default());
        let state = Self::from_parts(
            Arc::new(config),
            Arc::new(MemoryRepo::new()),
            Arc::new(MemoryStorage::new()),
            outbox.clone(),
        );
        (state, outbox)
    }
}
