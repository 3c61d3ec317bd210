use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use turnstile_core::{Operation, Plan, Platform, RefundOutcome, Subject, UsageCounter};
use turnstile_store::{Admission, BatchAdmission, CounterBound, CounterKey, CounterStore, StoreError};
use turnstile_store_memory::MemoryCounterStore;

use crate::builder::EngineBuilder;
use crate::engine::AdmissionEngine;
use crate::policy::{FailurePolicies, FailurePolicy};

/// Engine over a fresh memory store, plus a handle to that store.
pub(crate) fn engine_over(policy: FailurePolicy) -> (AdmissionEngine, Arc<MemoryCounterStore>) {
    let store = Arc::new(MemoryCounterStore::new());
    let engine = EngineBuilder::new()
        .store(store.clone())
        .failure_policy(FailurePolicies::new(policy))
        .build()
        .expect("engine should build");
    (engine, store)
}

/// A `starter` plan whose cycle began three days ago.
pub(crate) fn starter_plan() -> Plan {
    Plan::new("starter", Utc::now() - Duration::days(3))
}

/// Memory store that fails the first `failures` admission calls.
pub(crate) struct FlakyStore {
    inner: MemoryCounterStore,
    failures: AtomicU32,
    error: fn() -> StoreError,
    pub(crate) admit_calls: AtomicU32,
}

impl FlakyStore {
    pub(crate) fn failing_times(failures: u32, error: fn() -> StoreError) -> Self {
        Self {
            inner: MemoryCounterStore::new(),
            failures: AtomicU32::new(failures),
            error,
            admit_calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn failing_forever(error: fn() -> StoreError) -> Self {
        Self::failing_times(u32::MAX, error)
    }

    fn should_fail(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        ceiling: u64,
    ) -> Result<Admission, StoreError> {
        self.inner.check_and_increment(key, ceiling).await
    }

    async fn admit_all(&self, bounds: &[CounterBound]) -> Result<BatchAdmission, StoreError> {
        self.admit_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err((self.error)());
        }
        self.inner.admit_all(bounds).await
    }

    async fn decrement(&self, key: &CounterKey) -> Result<u64, StoreError> {
        self.inner.decrement(key).await
    }

    async fn refund(
        &self,
        key: &CounterKey,
        idempotency_key: &str,
    ) -> Result<RefundOutcome, StoreError> {
        self.inner.refund(key, idempotency_key).await
    }

    async fn get(&self, key: &CounterKey) -> Result<Option<UsageCounter>, StoreError> {
        self.inner.get(key).await
    }

    async fn counters_for(&self, subject: &Subject) -> Result<Vec<UsageCounter>, StoreError> {
        self.inner.counters_for(subject).await
    }

    async fn reset(
        &self,
        subject: &Subject,
        platform: Option<&Platform>,
        operation: Option<&Operation>,
    ) -> Result<u64, StoreError> {
        self.inner.reset(subject, platform, operation).await
    }

    async fn cleanup_expired(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.cleanup_expired(older_than).await
    }
}
