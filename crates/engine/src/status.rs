use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::{debug, instrument};

use turnstile_core::{
    Dimension, LimitCatalog, OperationStatus, Plan, StatusReport, Subject, Tier, UsageCounter,
    WindowConfig, WindowKind, WindowUsage, validate_subject,
};
use turnstile_store::CounterStore;

use crate::engine::AdmissionEngine;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::retry::ContentionController;

type CacheKey = (Subject, Tier, DateTime<Utc>);

/// Read-only projection of a subject's usage against its plan.
///
/// Only ever reads counters. The optional cache is a short-TTL read-through
/// for dashboards; admission decisions never consult it.
pub struct StatusReporter {
    store: Arc<dyn CounterStore>,
    catalog: Arc<LimitCatalog>,
    windows: WindowConfig,
    retry: Arc<ContentionController>,
    metrics: Arc<EngineMetrics>,
    cache: Option<Cache<CacheKey, StatusReport>>,
}

impl StatusReporter {
    pub(crate) fn new(
        store: Arc<dyn CounterStore>,
        catalog: Arc<LimitCatalog>,
        windows: WindowConfig,
        retry: Arc<ContentionController>,
        metrics: Arc<EngineMetrics>,
        cache_ttl: Option<Duration>,
        cache_capacity: u64,
    ) -> Self {
        let cache = cache_ttl.filter(|ttl| !ttl.is_zero()).map(|ttl| {
            Cache::builder()
                .max_capacity(cache_capacity)
                .time_to_live(ttl)
                .build()
        });
        Self {
            store,
            catalog,
            windows,
            retry,
            metrics,
            cache,
        }
    }

    /// Whether reports may be served from cache.
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Drop every cached report.
    pub fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    /// Report usage for `subject` under `plan` at every catalogued dimension.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidSubject`] for a malformed subject and
    /// [`EngineError::StoreUnavailable`] when the counters cannot be read.
    #[instrument(name = "engine.status", skip_all, fields(subject = %subject, tier = %plan.tier))]
    pub async fn status_for(
        &self,
        subject: &Subject,
        plan: &Plan,
    ) -> Result<StatusReport, EngineError> {
        validate_subject(subject)?;
        self.metrics.increment_status_reports();

        let Some(cache) = &self.cache else {
            return self.build(subject, plan).await;
        };

        let key = (subject.clone(), plan.tier.clone(), plan.cycle_anchor);
        if let Some(report) = cache.get(&key).await {
            debug!("status served from cache");
            return Ok(report);
        }
        let report = self.build(subject, plan).await?;
        cache.insert(key, report.clone()).await;
        Ok(report)
    }

    async fn build(&self, subject: &Subject, plan: &Plan) -> Result<StatusReport, EngineError> {
        let store = &self.store;
        let counters = self
            .retry
            .run("counters_for", move || store.counters_for(subject))
            .await
            .map_err(|source| {
                self.metrics.increment_store_unavailable();
                EngineError::StoreUnavailable {
                    retry_after: self.retry.retry_after(),
                    source,
                }
            })?;

        let now = Utc::now();
        let short = self.windows.short_window(&now);
        let cycle = self.windows.cycle_window(&plan.cycle_anchor, &now);
        let used = current_usage(counters, short.start, cycle.start);
        let tier = self.catalog.effective_tier(&plan.tier).clone();

        let mut platforms = BTreeMap::new();
        for platform in self.catalog.platforms() {
            let mut operations = BTreeMap::new();
            for (operation, ceilings) in self.catalog.operations_for(&tier, platform) {
                let dimension = Dimension::new(platform.clone(), operation.clone());
                let status = OperationStatus {
                    short: WindowUsage::new(
                        used.get(&(dimension.clone(), WindowKind::Short))
                            .copied()
                            .unwrap_or_default(),
                        ceilings.short,
                        short.end,
                    ),
                    cycle: WindowUsage::new(
                        used.get(&(dimension, WindowKind::Cycle))
                            .copied()
                            .unwrap_or_default(),
                        ceilings.cycle,
                        cycle.end,
                    ),
                };
                operations.insert(operation.clone(), status);
            }
            platforms.insert(platform.clone(), operations);
        }

        // Usage recorded against operations the tier does not list was
        // admitted under the fallback ceilings; report it too.
        for (dimension, _) in used.keys() {
            let Some(operations) = platforms.get_mut(&dimension.platform) else {
                continue;
            };
            if operations.contains_key(&dimension.operation) {
                continue;
            }
            let ceilings = self.catalog.fallback_ceilings();
            let usage = |kind| {
                used.get(&(dimension.clone(), kind))
                    .copied()
                    .unwrap_or_default()
            };
            operations.insert(
                dimension.operation.clone(),
                OperationStatus {
                    short: WindowUsage::new(usage(WindowKind::Short), ceilings.short, short.end),
                    cycle: WindowUsage::new(usage(WindowKind::Cycle), ceilings.cycle, cycle.end),
                },
            );
        }

        Ok(StatusReport {
            subject: subject.clone(),
            tier,
            generated_at: now,
            platforms,
        })
    }
}

/// Index the counters belonging to the current windows by dimension.
fn current_usage(
    counters: Vec<UsageCounter>,
    short_start: DateTime<Utc>,
    cycle_start: DateTime<Utc>,
) -> HashMap<(Dimension, WindowKind), u64> {
    counters
        .into_iter()
        .filter(|c| match c.window {
            WindowKind::Short => c.window_start == short_start,
            WindowKind::Cycle => c.window_start == cycle_start,
        })
        .map(|c| ((c.dimension, c.window), c.count))
        .collect()
}

impl AdmissionEngine {
    /// Report `subject`'s current usage. Never creates or mutates counters.
    ///
    /// # Errors
    ///
    /// See [`StatusReporter::status_for`].
    pub async fn status_for(
        &self,
        subject: &Subject,
        plan: &Plan,
    ) -> Result<StatusReport, EngineError> {
        self.status.status_for(subject, plan).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use turnstile_core::{Operation, Platform};
    use turnstile_store::CounterKey;
    use turnstile_store_memory::MemoryCounterStore;

    use super::*;
    use crate::builder::EngineBuilder;
    use crate::policy::{FailurePolicies, FailurePolicy};
    use crate::test_support::{engine_over, starter_plan};

    #[tokio::test]
    async fn status_reads_never_create_rows() {
        let (engine, store) = engine_over(FailurePolicy::FailClosed);
        let plan = starter_plan();
        let subject = Subject::from("reader");

        for _ in 0..1000 {
            let report = engine.status_for(&subject, &plan).await.unwrap();
            assert_eq!(report.get("facebook", "post").unwrap().short.used, 0);
        }
        assert!(store.is_empty(), "status must not create counters");

        engine
            .decide(
                &subject,
                &plan,
                &Platform::from("facebook"),
                &Operation::from(Operation::POST),
            )
            .await
            .unwrap();
        let before = store.counters_for(&subject).await.unwrap();
        for _ in 0..1000 {
            engine.status_for(&subject, &plan).await.unwrap();
        }
        let after = store.counters_for(&subject).await.unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.count, a.count);
        }
    }

    #[tokio::test]
    async fn report_reflects_usage_and_limits() {
        let (engine, _) = engine_over(FailurePolicy::FailClosed);
        let plan = starter_plan();
        let subject = Subject::from("dash");
        let facebook = Platform::from("facebook");
        let post = Operation::from(Operation::POST);

        for _ in 0..3 {
            engine.decide(&subject, &plan, &facebook, &post).await.unwrap();
        }

        let report = engine.status_for(&subject, &plan).await.unwrap();
        assert_eq!(report.tier.as_str(), "starter");
        let status = report.get("facebook", "post").unwrap();
        assert_eq!(status.short.used, 3);
        assert_eq!(status.short.limit, 5);
        assert_eq!(status.short.remaining, 2);
        assert!((status.short.percentage - 60.0).abs() < 1e-9);
        assert_eq!(status.cycle.used, 3);
        assert_eq!(status.cycle.limit, 12);
        assert_eq!(status.cycle.remaining, 9);

        let untouched = report.get("linkedin", "post").unwrap();
        assert_eq!(untouched.short.used, 0);
        assert_eq!(report.platforms.len(), 7);
    }

    #[tokio::test]
    async fn stale_windows_are_not_reported() {
        let (engine, store) = engine_over(FailurePolicy::FailClosed);
        let plan = starter_plan();
        let short = engine.windows().short_window(&Utc::now());
        let stale = engine
            .windows()
            .window_at(WindowKind::Short, short.start - ChronoDuration::hours(2));
        let key = CounterKey::new("stale", Dimension::new("facebook", "post"), &stale);
        store.check_and_increment(&key, 5).await.unwrap();

        let report = engine
            .status_for(&Subject::from("stale"), &plan)
            .await
            .unwrap();
        assert_eq!(report.get("facebook", "post").unwrap().short.used, 0);
    }

    #[tokio::test]
    async fn fallback_operations_are_reported() {
        let (engine, _) = engine_over(FailurePolicy::FailClosed);
        let plan = starter_plan();
        let subject = Subject::from("stories");
        engine
            .decide(&subject, &plan, &Platform::from("instagram"), &Operation::from("story"))
            .await
            .unwrap();

        let report = engine.status_for(&subject, &plan).await.unwrap();
        let story = report.get("instagram", "story").unwrap();
        assert_eq!(story.short.used, 1);
        assert_eq!(story.short.limit, 1);
        assert_eq!(story.cycle.limit, 3);
    }

    #[tokio::test]
    async fn cached_reports_are_served_until_invalidated() {
        let store = Arc::new(MemoryCounterStore::new());
        let engine = EngineBuilder::new()
            .store(store.clone())
            .failure_policy(FailurePolicies::new(FailurePolicy::FailClosed))
            .status_cache(Duration::from_secs(60), 1_000)
            .build()
            .unwrap();
        assert!(engine.status_reporter().is_cached());

        let plan = starter_plan();
        let subject = Subject::from("cached");
        let first = engine.status_for(&subject, &plan).await.unwrap();

        let facebook = Platform::from("facebook");
        let post = Operation::from(Operation::POST);
        let admitted = engine.decide(&subject, &plan, &facebook, &post).await.unwrap();
        assert!(admitted.allowed, "admission must not be affected by the cache");

        let cached = engine.status_for(&subject, &plan).await.unwrap();
        assert_eq!(cached, first);

        engine.status_reporter().invalidate();
        let fresh = engine.status_for(&subject, &plan).await.unwrap();
        assert_eq!(fresh.get("facebook", "post").unwrap().short.used, 1);
    }
}
