//! Notification ingress API server
//!
//! Accepts notification requests over HTTP, writes them into the outbox
//! for a worker to dispatch, and exposes the observational `/control`
//! endpoints backed by an embedded processor (see `routes::control`).

use std::sync::Arc;

use anyhow::Result;
use api::{AppState, config::Config};
use notifier_core::contacts::StaticContactDirectory;
use teloxide::Bot;
use tracing::info;
use worker::Config as WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    notifier_shared::bootstrap::init_env();
    let _guard = notifier_shared::bootstrap::init_tracing("api");

    info!("starting notification ingress API");

    let config = Config::from_env()?;
    let worker_config = WorkerConfig::from_env()?;

    let pool = notifier_shared::bootstrap::init_db(&config.core).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("database migrations completed");

    let contacts = Arc::new(StaticContactDirectory::new());
    let bot = Bot::new(worker_config.core.telegram_bot_token.clone());
    let (repo, processor) =
        worker::build_processor(pool.clone(), bot, &worker_config, contacts.clone())?;

    let state = AppState {
        pool,
        contacts,
        dispatcher: worker_config.dispatcher,
        repo,
        processor,
    };

    api::run_api(state, &config).await?;

    Ok(())
}
