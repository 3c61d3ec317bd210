use std::sync::Arc;
use std::time::Duration;

use turnstile_core::{LimitCatalog, WindowConfig};
use turnstile_store::CounterStore;

use crate::engine::AdmissionEngine;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::policy::FailurePolicies;
use crate::retry::{ContentionController, RetryPolicy};
use crate::status::StatusReporter;

/// Builder for constructing an [`AdmissionEngine`] instance.
pub struct EngineBuilder {
    store: Option<Arc<dyn CounterStore>>,
    catalog: LimitCatalog,
    windows: WindowConfig,
    retry: RetryPolicy,
    failure: Option<FailurePolicies>,
    status_cache_ttl: Option<Duration>,
    status_cache_capacity: u64,
    metrics: Option<Arc<EngineMetrics>>,
}

impl EngineBuilder {
    /// Create a new builder with the built-in catalog and default windows.
    pub fn new() -> Self {
        Self {
            store: None,
            catalog: LimitCatalog::builtin(),
            windows: WindowConfig::default(),
            retry: RetryPolicy::default(),
            failure: None,
            status_cache_ttl: None,
            status_cache_capacity: 10_000,
            metrics: None,
        }
    }

    /// Set the counter store backend.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the limit catalog.
    #[must_use]
    pub fn catalog(mut self, catalog: LimitCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the short-window and billing-cycle periods.
    #[must_use]
    pub fn windows(mut self, windows: WindowConfig) -> Self {
        self.windows = windows;
        self
    }

    /// Set the retry and per-call timeout policy for store calls.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set what admissions do when the store is unavailable. Required.
    #[must_use]
    pub fn failure_policy(mut self, policies: FailurePolicies) -> Self {
        self.failure = Some(policies);
        self
    }

    /// Serve status reports from a cache holding up to `capacity` reports
    /// for `ttl`. Disabled by default.
    #[must_use]
    pub fn status_cache(mut self, ttl: Duration, capacity: u64) -> Self {
        self.status_cache_ttl = Some(ttl);
        self.status_cache_capacity = capacity;
        self
    }

    /// Share an existing metrics handle instead of creating one.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consume the builder and produce a configured [`AdmissionEngine`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the store or the failure
    /// policy has not been set, or the retry policy cannot make progress.
    pub fn build(self) -> Result<AdmissionEngine, EngineError> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Configuration("counter store is required".into()))?;

        let failure = self.failure.ok_or_else(|| {
            EngineError::Configuration(
                "failure policy is required (fail_open or fail_closed)".into(),
            )
        })?;

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Configuration(
                "retry max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.call_timeout.is_zero() {
            return Err(EngineError::Configuration(
                "store call timeout must be greater than 0".into(),
            ));
        }

        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(EngineMetrics::default()));
        let catalog = Arc::new(self.catalog);
        let retry = Arc::new(ContentionController::new(self.retry, Arc::clone(&metrics)));

        let status = StatusReporter::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            self.windows,
            Arc::clone(&retry),
            Arc::clone(&metrics),
            self.status_cache_ttl,
            self.status_cache_capacity,
        );

        Ok(AdmissionEngine {
            store,
            catalog,
            windows: self.windows,
            retry,
            failure,
            status,
            metrics,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
