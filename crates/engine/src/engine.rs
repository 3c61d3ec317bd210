use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use turnstile_core::{
    AdmissionResult, AdmissionTicket, DenialReason, Dimension, LimitCatalog, Operation, Plan,
    Platform, Subject, WindowConfig, validate_subject,
};
use turnstile_store::{BatchAdmission, CounterBound, CounterKey, CounterStore, StoreError};

use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::policy::{FailurePolicies, FailurePolicy};
use crate::retry::ContentionController;
use crate::status::StatusReporter;

/// The single authority on whether a metered operation may proceed.
///
/// Built once through [`EngineBuilder`](crate::EngineBuilder) and shared
/// behind an `Arc`. The counter store is the only shared mutable state; the
/// engine itself holds no per-subject data.
pub struct AdmissionEngine {
    pub(crate) store: Arc<dyn CounterStore>,
    pub(crate) catalog: Arc<LimitCatalog>,
    pub(crate) windows: WindowConfig,
    pub(crate) retry: Arc<ContentionController>,
    pub(crate) failure: FailurePolicies,
    pub(crate) status: StatusReporter,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl std::fmt::Debug for AdmissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("windows", &self.windows)
            .field("retry", &self.retry.policy())
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl AdmissionEngine {
    /// Decide whether `subject` may perform `operation` on `platform` now.
    ///
    /// The short window is checked first; its denial never touches the cycle
    /// counter. A cycle denial reverses the short increment before
    /// returning, so a denied request consumes nothing.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidSubject`] for an empty, oversized or
    ///   control-character subject.
    /// - [`EngineError::UnknownPlatform`] when the catalog does not know
    ///   `platform`.
    /// - [`EngineError::StoreUnavailable`] when the store stays unreachable
    ///   and the operation class fails closed.
    #[instrument(
        name = "engine.decide",
        skip_all,
        fields(
            subject = %subject,
            platform = %platform,
            operation = %operation,
            tier = %plan.tier,
        )
    )]
    pub async fn decide(
        &self,
        subject: &Subject,
        plan: &Plan,
        platform: &Platform,
        operation: &Operation,
    ) -> Result<AdmissionResult, EngineError> {
        validate_subject(subject)?;
        let ceilings = self.catalog.limits_for(&plan.tier, platform, operation)?;
        self.metrics.increment_decisions();

        let now = Utc::now();
        let short = self.windows.short_window(&now);
        let cycle = self.windows.cycle_window(&plan.cycle_anchor, &now);
        let dimension = Dimension::new(platform.clone(), operation.clone());

        let bounds = [
            CounterBound::new(
                CounterKey::new(subject.clone(), dimension.clone(), &short),
                ceilings.short,
            ),
            CounterBound::new(
                CounterKey::new(subject.clone(), dimension.clone(), &cycle),
                ceilings.cycle,
            ),
        ];

        let store = &self.store;
        let batch = &bounds;
        let outcome = self
            .retry
            .run("admit_all", move || store.admit_all(batch))
            .await;

        match outcome {
            Ok(BatchAdmission::Admitted(counts)) => {
                let short_count = counts.first().copied().unwrap_or_default();
                let cycle_count = counts.get(1).copied().unwrap_or_default();
                let remaining = ceilings
                    .short
                    .saturating_sub(short_count)
                    .min(ceilings.cycle.saturating_sub(cycle_count));

                let ticket = AdmissionTicket {
                    admission_id: Uuid::now_v7(),
                    subject: subject.clone(),
                    dimension,
                    short_window_start: short.start,
                    cycle_window_start: cycle.start,
                };
                self.metrics.increment_allowed();
                debug!(
                    admission_id = %ticket.admission_id,
                    short_count,
                    cycle_count,
                    remaining,
                    "admitted"
                );
                Ok(AdmissionResult::admitted(
                    remaining,
                    short.end.min(cycle.end),
                    ticket,
                ))
            }
            Ok(BatchAdmission::Denied { index, count }) => {
                let (reason, reset_at) = if index == 0 {
                    self.metrics.increment_denied_short_window();
                    (DenialReason::ShortWindowExceeded, short.end)
                } else {
                    self.metrics.increment_denied_cycle();
                    (DenialReason::CycleExceeded, cycle.end)
                };
                info!(%reason, count, %reset_at, "admission denied");
                Ok(AdmissionResult::denied(reason, reset_at))
            }
            Err(e) => self.store_failure(operation, e, short.end.min(cycle.end)),
        }
    }

    /// Apply the configured failure policy to a store failure.
    fn store_failure(
        &self,
        operation: &Operation,
        source: StoreError,
        reset_at: DateTime<Utc>,
    ) -> Result<AdmissionResult, EngineError> {
        match self.failure.for_operation(operation) {
            FailurePolicy::FailOpen => {
                self.metrics.increment_failed_open();
                error!(
                    error = %source,
                    "counter store unavailable, admitting without quota check (fail-open)"
                );
                Ok(AdmissionResult::failed_open(reset_at))
            }
            FailurePolicy::FailClosed => {
                warn!(error = %source, "counter store unavailable, refusing admission");
                Err(self.unavailable(source))
            }
        }
    }

    pub(crate) fn unavailable(&self, source: StoreError) -> EngineError {
        self.metrics.increment_store_unavailable();
        EngineError::StoreUnavailable {
            retry_after: self.retry.retry_after(),
            source,
        }
    }

    pub fn catalog(&self) -> &LimitCatalog {
        &self.catalog
    }

    pub fn windows(&self) -> &WindowConfig {
        &self.windows
    }

    pub fn failure_policies(&self) -> &FailurePolicies {
        &self.failure
    }

    pub fn status_reporter(&self) -> &StatusReporter {
        &self.status
    }

    /// Shared handle to the engine's counters.
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Probe the counter store.
    ///
    /// # Errors
    ///
    /// Returns the store's error when it cannot be reached.
    pub async fn ping_store(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}
