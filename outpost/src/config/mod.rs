//! Application configuration.
//!
//! Loaded once at startup: defaults, then an optional JSON file named by
//! `OUTPOST_CONFIG`, then a handful of environment overrides.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::breaker::{BreakerConfig, CircuitBreakerRegistry};
use crate::database::default_pool_size;
use crate::dispatch::ChannelConfig;
use crate::logging::LoggingConfig;
use crate::queue::RetryPolicy;
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

pub const CONFIG_PATH_ENV: &str = "OUTPOST_CONFIG";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const TICK_INTERVAL_ENV: &str = "OUTPOST_TICK_INTERVAL_MS";
pub const BATCH_LIMIT_ENV: &str = "OUTPOST_BATCH_LIMIT";
pub const LOG_FILTER_ENV: &str = "OUTPOST_LOG_FILTER";
pub const LOG_DIR_ENV: &str = "OUTPOST_LOG_DIR";

const DEFAULT_DATABASE_URL: &str = "sqlite:outpost.db?mode=rwc";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: default_pool_size(),
        }
    }
}

/// Breaker settings: a default plus per-service overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    pub default: BreakerConfig,
    pub services: HashMap<String, BreakerConfig>,
}

impl BreakersConfig {
    pub fn build_registry(&self) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(self.default.clone()).with_overrides(self.services.clone())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerConfig,
    pub breakers: BreakersConfig,
    pub channels: Vec<ChannelConfig>,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `.env`, the `OUTPOST_CONFIG` file and the environment.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|e| Error::config(format!("invalid config file {}: {e}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(DATABASE_URL_ENV) {
            self.database.url = url;
        }
        if let Some(raw) = lookup(TICK_INTERVAL_ENV) {
            self.scheduler.tick_interval_ms = parse_number(TICK_INTERVAL_ENV, &raw)?;
        }
        if let Some(raw) = lookup(BATCH_LIMIT_ENV) {
            self.scheduler.batch_limit = parse_number(BATCH_LIMIT_ENV, &raw)?;
        }
        if let Some(filter) = lookup(LOG_FILTER_ENV) {
            self.logging.filter = filter;
        }
        if let Some(dir) = lookup(LOG_DIR_ENV) {
            self.logging.dir = Some(dir.into());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::config("database url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(Error::config("database max_connections must be at least 1"));
        }

        self.retry.validate()?;
        self.scheduler.validate()?;
        self.logging.validate()?;

        self.breakers.default.validate()?;
        for (service, breaker) in &self.breakers.services {
            breaker
                .validate()
                .map_err(|e| Error::config(format!("breaker for service '{service}': {e}")))?;
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !seen.insert(channel.channel.as_str()) {
                return Err(Error::config(format!(
                    "channel '{}' is configured more than once",
                    channel.channel
                )));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} must be a non-negative integer, got '{raw}'")))
}
