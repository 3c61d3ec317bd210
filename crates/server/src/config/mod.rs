mod engine;
mod server;
mod store;


pub use engine::*;
pub use server::*;
pub use store::*;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use turnstile_core::{LimitCatalog, WindowConfig};
use turnstile_engine::{EngineBuilder, FailurePolicies, RetryPolicy};

use crate::error::ServerError;

/// Top-level configuration for the turnstile server, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct TurnstileConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Counter store backend configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Window periods and store call bounds.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Retry behaviour for transient store failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// What admissions do when the store is unavailable. Must be set.
    pub failure_policy: Option<FailurePolicies>,
    /// Status report caching.
    #[serde(default)]
    pub status: StatusConfig,
    /// Expired window cleanup.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Log output configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Limit catalog. The built-in catalog is used when absent.
    pub catalog: Option<LimitCatalog>,
}

impl TurnstileConfig {
    /// Read `path` if it exists, otherwise start from defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let contents = if path.exists() {
            std::fs::read_to_string(path).map_err(|e| {
                ServerError::Config(format!("failed to read {}: {e}", path.display()))
            })?
        } else {
            String::new()
        };
        Self::parse(&contents)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for malformed TOML or an invalid catalog.
    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(format!("invalid config: {e}")))
    }

    /// Window periods from the `[engine]` section.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for a zero-length period.
    pub fn window_config(&self) -> Result<WindowConfig, ServerError> {
        let cycle_seconds = self.engine.cycle_days.saturating_mul(86_400);
        WindowConfig::new(self.engine.short_window_seconds, cycle_seconds)
            .map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            call_timeout: Duration::from_millis(self.engine.store_timeout_ms),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.maintenance.retention_hours.saturating_mul(3_600))
    }

    /// An engine builder carrying everything except the store.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when `failure_policy` is missing or the
    /// window periods are invalid.
    pub fn engine_builder(&self) -> Result<EngineBuilder, ServerError> {
        let failure = self.failure_policy.clone().ok_or_else(|| {
            ServerError::Config(
                "failure_policy is required: set failure_policy.default to \"fail_open\" or \"fail_closed\""
                    .to_owned(),
            )
        })?;

        let mut builder = EngineBuilder::new()
            .windows(self.window_config()?)
            .retry_policy(self.retry_policy())
            .failure_policy(failure);

        if let Some(catalog) = &self.catalog {
            builder = builder.catalog(catalog.clone());
        }
        if self.status.cache_ttl_seconds > 0 {
            builder = builder.status_cache(
                Duration::from_secs(self.status.cache_ttl_seconds),
                self.status.cache_capacity,
            );
        }
        Ok(builder)
    }
}
