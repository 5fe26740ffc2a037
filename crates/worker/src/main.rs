//! Worker process entry point: connects to Postgres, runs pending
//! migrations, and drives the claimer tick loop until SIGINT/SIGTERM.

use std::sync::Arc;

use notifier_core::contacts::StaticContactDirectory;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifier_shared::bootstrap::init_env();
    let _guard = notifier_shared::bootstrap::init_tracing("worker");

    let config = Config::from_env()?;
    let pool = notifier_shared::bootstrap::init_db(&config.core).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("migrations applied");

    let bot = Bot::new(config.core.telegram_bot_token.clone());
    let contacts = Arc::new(StaticContactDirectory::new());

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    worker::run_worker(pool, bot, config, contacts, shutdown).await?;

    Ok(())
}
