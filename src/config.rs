//! Settings for a store session.
//!
//! Defaults are built in; an optional file and `EAVQL__*` environment
//! variables override them, in that order.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; `None` opens a private in-memory database.
    #[serde(default)]
    pub path: Option<String>,
    pub journal_mode: String,
    pub synchronous: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub attempts: u32,
    pub value_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub retry: RetrySettings,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings {
                path: None,
                journal_mode: "WAL".to_string(),
                synchronous: "NORMAL".to_string(),
            },
            retry: RetrySettings {
                attempts: 4,
                value_attempts: 3,
                backoff_ms: 0,
            },
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings, layering `file` (when given and present) and the
    /// environment over the defaults.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("database.journal_mode", defaults.database.journal_mode)?
            .set_default("database.synchronous", defaults.database.synchronous)?
            .set_default("retry.attempts", i64::from(defaults.retry.attempts))?
            .set_default("retry.value_attempts", i64::from(defaults.retry.value_attempts))?
            .set_default("retry.backoff_ms", defaults.retry.backoff_ms as i64)?
            .set_default("log_filter", defaults.log_filter)?;
        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("EAVQL").separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }

    pub fn in_memory() -> Self {
        Settings::default()
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        let mut settings = Settings::default();
        settings.database.path = Some(path.into());
        settings
    }

    /// Retry policy for tables, names and items.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_millis(self.retry.backoff_ms),
        )
    }

    /// Retry policy for the value dictionary.
    pub fn value_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.value_attempts,
            Duration::from_millis(self.retry.backoff_ms),
        )
    }

    /// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to
    /// `log_filter`. Safe to call more than once.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}
