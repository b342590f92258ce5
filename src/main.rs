mod app;
mod auth;
mod config;
mod error;
mod files;
mod mailer;
mod repo;
mod state;
mod storage;
mod sweeper;
mod token;

use crate::{auth::credentials, config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "secureshare=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let addr = config.server_address();
    let state = AppState::init(config).await?;

    if let Some(seed) = state.config.operations_seed.clone() {
        credentials::ensure_operations_account(&state, &seed).await?;
    }

    let sweeper = sweeper::spawn(state.clone());

    let app = app::build_app(state);
    app::serve(app, &addr).await?;

    sweeper.abort();
    Ok(())
}
