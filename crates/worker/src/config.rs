//! Worker process configuration
//!
//! Loads the shared core config plus the dispatcher tunables and the
//! channel-specific settings (SMTP, Telegram bot token already lives on
//! `CoreConfig`).

use anyhow::{Context, Result};
use notifier_core::config::{CoreConfig, DispatcherConfig};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub core: CoreConfig,
    pub dispatcher: DispatcherConfig,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub smtp_pool_size: u32,

    pub sms_gateway_url: String,
    pub sms_api_id: String,
    pub sms_from: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            core: CoreConfig::from_env()?,
            dispatcher: DispatcherConfig::from_env()?,
            smtp_host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .context("SMTP_PORT must be a valid port")?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").unwrap_or_else(|_| "notifier@example.com".to_string()),
            smtp_pool_size: env::var("SMTP_POOL_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("SMTP_POOL_SIZE must be a valid integer")?,
            sms_gateway_url: env::var("SMS_GATEWAY_URL")
                .unwrap_or_else(|_| "https://sms.ru/sms/send".to_string()),
            sms_api_id: env::var("SMS_API_ID").unwrap_or_default(),
            sms_from: env::var("SMS_FROM").unwrap_or_default(),
        })
    }
}
