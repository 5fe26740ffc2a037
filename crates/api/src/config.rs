//! API server configuration from environment variables

use anyhow::{Context, Result};
use notifier_core::config::CoreConfig;
use std::env;

/// API server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origin: String,
    pub core: CoreConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("failed to parse API_PORT as u16")?,
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            core: CoreConfig::from_env()?,
        })
    }
}
