//! Shared configuration logic
//!
//! Handles loading of common environment variables and the dispatcher's
//! tunables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Common configuration used across services.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Database connection URL
    pub database_url: String,

    /// Telegram bot token, used by the `TelegramSender` channel
    pub telegram_bot_token: String,

    /// Max Postgres pool connections
    pub db_max_connections: u32,
}

impl CoreConfig {
    /// Load common configuration from environment variables.
    ///
    /// This will also initialize dotenv if it hasn't been done yet.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN must be set")?,
            db_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid integer")?,
        })
    }
}

/// Dispatcher tunables controlling the claim tick, retry backoff, and
/// channel send timeout.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the claimer tick fires. Default 10s.
    pub tick_interval: Duration,
    /// Max rows claimed per tick. Default 50.
    pub batch_size: i64,
    /// An `ENQUEUED` row older than this is considered abandoned. Default 60s.
    pub stale_lease: Duration,
    /// Max delivery attempts per outbox row before it fails out. Default 3.
    pub max_retries: i32,
    /// Base of the exponential backoff delay. Default 10s.
    pub retry_base_delay: Duration,
    /// Cap on the exponential backoff delay. Default 5 minutes.
    pub retry_max_delay: Duration,
    /// Per-call timeout for channel sends. Default 10s.
    pub channel_timeout: Duration,
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            tick_interval: Duration::from_secs(env_u64("TICK_INTERVAL_SECS", 10)?),
            batch_size: env_i64("BATCH_SIZE", 50)?,
            stale_lease: Duration::from_secs(env_u64("STALE_LEASE_SECS", 60)?),
            max_retries: env_i32("MAX_RETRIES", 3)?,
            retry_base_delay: Duration::from_secs(env_u64("RETRY_BASE_DELAY_SECS", 10)?),
            retry_max_delay: Duration::from_secs(env_u64("RETRY_MAX_DELAY_SECS", 300)?),
            channel_timeout: Duration::from_secs(env_u64("CHANNEL_TIMEOUT_SECS", 10)?),
        })
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            batch_size: 50,
            stale_lease: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(300),
            channel_timeout: Duration::from_secs(10),
        }
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} must be a valid integer")),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} must be a valid integer")),
        Err(_) => Ok(default),
    }
}

fn env_i32(key: &str, default: i32) -> Result<i32> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} must be a valid integer")),
        Err(_) => Ok(default),
    }
}
