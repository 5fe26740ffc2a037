//! Background dispatcher worker
//!
//! Claims due outbox rows and drives each through its channel sender with
//! retry and fallback-chain semantics.

pub mod channels;
mod config;
pub mod db;
mod mailer;
pub mod processor;
pub mod scheduler;

pub use config::Config;
pub use mailer::Mailer;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use notifier_core::contacts::ContactDirectory;
use notifier_core::models::DeliveryMethod;
use sqlx::PgPool;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use channels::{ChannelSender, EmailSender, SmsSender, TelegramSender};
use db::OutboxRepository;
use processor::Processor;
use scheduler::Scheduler;

/// Build the repository and processor from config, wiring up one channel
/// sender per method. Shared by the worker binary's own tick loop and by
/// any other process (e.g. the API's `trigger_processing` control
/// endpoint) that wants to drive outbox rows through without running a
/// full scheduler.
pub fn build_processor(
    pool: PgPool,
    bot: Bot,
    config: &Config,
    contacts: Arc<dyn ContactDirectory>,
) -> Result<(OutboxRepository, Arc<Processor>)> {
    let repo = OutboxRepository::new(pool);
    let mailer = Mailer::new(config)?;

    let mut senders: HashMap<DeliveryMethod, Arc<dyn ChannelSender>> = HashMap::new();
    senders.insert(DeliveryMethod::Email, Arc::new(EmailSender::new(mailer)));
    senders.insert(DeliveryMethod::Telegram, Arc::new(TelegramSender::new(bot)));
    senders.insert(
        DeliveryMethod::Sms,
        Arc::new(SmsSender::new(
            config.sms_gateway_url.clone(),
            config.sms_api_id.clone(),
            config.sms_from.clone(),
        )),
    );

    let processor = Arc::new(Processor::new(
        repo.clone(),
        senders,
        contacts,
        config.dispatcher.channel_timeout,
        config.dispatcher.retry_base_delay,
        config.dispatcher.retry_max_delay,
    ));

    Ok((repo, processor))
}

/// Assemble the repository, channel senders, and processor, then run the
/// claimer tick loop until `shutdown` is cancelled.
pub async fn run_worker(
    pool: PgPool,
    bot: Bot,
    config: Config,
    contacts: Arc<dyn ContactDirectory>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (repo, processor) = build_processor(pool, bot, &config, contacts)?;

    info!(
        tick_interval = ?config.dispatcher.tick_interval,
        batch_size = config.dispatcher.batch_size,
        max_retries = config.dispatcher.max_retries,
        "starting worker"
    );

    let scheduler = Scheduler::new(
        repo,
        processor,
        config.dispatcher.tick_interval,
        config.dispatcher.batch_size,
        config.dispatcher.stale_lease,
    );

    scheduler.run(shutdown).await;
    info!("worker shutdown complete");
    Ok(())
}
