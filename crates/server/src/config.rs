//! Unified configuration: composes the API and worker configs so the
//! single `notifier` binary can run both off one set of environment
//! variables.

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct UnifiedConfig {
    pub api: api::config::Config,
    pub worker: worker::Config,
}

impl UnifiedConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api: api::config::Config::from_env()?,
            worker: worker::Config::from_env()?,
        })
    }
}
