//! Unified process entry point: runs the ingress API and the dispatcher
//! worker side by side against one database pool, sharing a single
//! migration run and shutdown signal. Useful for small deployments; the
//! `api` and `worker` binaries remain independently runnable for
//! deployments that want to scale them separately (see spec.md §5:
//! "Multiple scheduler processes and multiple worker processes may run in
//! parallel across hosts").

use std::sync::Arc;

use anyhow::Result;
use api::AppState;
use notifier_core::contacts::StaticContactDirectory;
use sqlx::PgPool;
use teloxide::Bot;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod config;

use config::UnifiedConfig;

#[tokio::main]
async fn main() -> Result<()> {
    notifier_shared::bootstrap::init_env();
    let _guard = notifier_shared::bootstrap::init_tracing("server");

    tracing::info!("starting unified notifier server");

    let config = UnifiedConfig::from_env()?;

    let pool = notifier_shared::bootstrap::init_db(&config.api.core).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("database migrations completed");

    let shutdown = CancellationToken::new();

    let api_handle = spawn_api(pool.clone(), config.clone(), shutdown.clone());
    let worker_handle = spawn_worker(pool, config, shutdown.clone());

    wait_for_shutdown().await;
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    let (api_result, worker_result) = tokio::join!(api_handle, worker_handle);
    api_result??;
    worker_result??;

    tracing::info!("all services stopped gracefully");
    Ok(())
}

fn spawn_api(
    pool: PgPool,
    config: UnifiedConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let contacts = Arc::new(StaticContactDirectory::new());
        let bot = Bot::new(config.worker.core.telegram_bot_token.clone());
        let (repo, processor) =
            worker::build_processor(pool.clone(), bot, &config.worker, contacts.clone())?;

        let state = AppState {
            pool,
            contacts,
            dispatcher: config.worker.dispatcher.clone(),
            repo,
            processor,
        };

        tokio::select! {
            result = api::run_api(state, &config.api) => {
                if let Err(e) = &result {
                    tracing::error!(error = %e, "API service exited");
                }
                result.map_err(anyhow::Error::from)
            }
            () = shutdown.cancelled() => {
                tracing::info!("API service shutting down");
                Ok(())
            }
        }
    })
}

fn spawn_worker(
    pool: PgPool,
    config: UnifiedConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let bot = Bot::new(config.worker.core.telegram_bot_token.clone());
        let contacts = Arc::new(StaticContactDirectory::new());

        worker::run_worker(pool, bot, config.worker, contacts, shutdown).await
    })
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
