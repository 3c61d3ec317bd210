use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use turnstile_core::{Operation, Platform, RefundOutcome, Subject, UsageCounter};
use turnstile_store::error::StoreError;
use turnstile_store::key::CounterKey;
use turnstile_store::store::{Admission, CounterStore};

/// A single counter row.
#[derive(Debug, Clone)]
struct Row {
    count: u64,
    updated_at: DateTime<Utc>,
}

/// In-memory [`CounterStore`] backed by a [`DashMap`].
///
/// Each row is mutated only through the map's entry API, which holds the
/// shard's write lock for the whole read-compare-write, so same-row callers
/// are serialized. State is per process: use it for tests and single-node
/// development, never behind more than one server instance.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<CounterKey, Row>,
    refunds: DashMap<(CounterKey, String), DateTime<Utc>>,
}

impl MemoryCounterStore {
    /// Create a new, empty in-memory counter store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counter rows currently held.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn to_counter(key: &CounterKey, row: &Row) -> UsageCounter {
        UsageCounter {
            subject: key.subject.clone(),
            dimension: key.dimension.clone(),
            window: key.window,
            window_start: key.window_start,
            window_end: key.window_end,
            count: row.count,
            updated_at: row.updated_at,
        }
    }

    fn decrement_row(&self, key: &CounterKey) -> u64 {
        match self.counters.get_mut(key) {
            Some(mut row) => {
                row.count = row.count.saturating_sub(1);
                row.updated_at = Utc::now();
                row.count
            }
            None => 0,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        ceiling: u64,
    ) -> Result<Admission, StoreError> {
        let now = Utc::now();
        let admission = match self.counters.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let row = occupied.get_mut();
                if row.count < ceiling {
                    row.count += 1;
                    row.updated_at = now;
                    Admission {
                        count: row.count,
                        admitted: true,
                    }
                } else {
                    Admission {
                        count: row.count,
                        admitted: false,
                    }
                }
            }
            Entry::Vacant(vacant) => {
                if ceiling >= 1 {
                    vacant.insert(Row {
                        count: 1,
                        updated_at: now,
                    });
                    Admission {
                        count: 1,
                        admitted: true,
                    }
                } else {
                    Admission {
                        count: 0,
                        admitted: false,
                    }
                }
            }
        };
        Ok(admission)
    }

    async fn decrement(&self, key: &CounterKey) -> Result<u64, StoreError> {
        Ok(self.decrement_row(key))
    }

    async fn refund(
        &self,
        key: &CounterKey,
        idempotency_key: &str,
    ) -> Result<RefundOutcome, StoreError> {
        // The ledger entry guard is held across the decrement so a concurrent
        // refund with the same key waits and then sees it as applied.
        match self.refunds.entry((key.clone(), idempotency_key.to_owned())) {
            Entry::Occupied(_) => Ok(RefundOutcome::AlreadyRefunded),
            Entry::Vacant(vacant) => {
                let Some(mut row) = self.counters.get_mut(key).filter(|row| row.count > 0) else {
                    return Ok(RefundOutcome::NothingToRefund);
                };
                row.count -= 1;
                row.updated_at = Utc::now();
                let count = row.count;
                drop(row);
                vacant.insert(key.window_end);
                Ok(RefundOutcome::Refunded { count })
            }
        }
    }

    async fn get(&self, key: &CounterKey) -> Result<Option<UsageCounter>, StoreError> {
        Ok(self
            .counters
            .get(key)
            .map(|row| Self::to_counter(key, &row)))
    }

    async fn counters_for(&self, subject: &Subject) -> Result<Vec<UsageCounter>, StoreError> {
        Ok(self
            .counters
            .iter()
            .filter(|entry| entry.key().subject == *subject)
            .map(|entry| Self::to_counter(entry.key(), entry.value()))
            .collect())
    }

    async fn reset(
        &self,
        subject: &Subject,
        platform: Option<&Platform>,
        operation: Option<&Operation>,
    ) -> Result<u64, StoreError> {
        let matches = |key: &CounterKey| {
            key.subject == *subject
                && platform.is_none_or(|p| key.platform() == p)
                && operation.is_none_or(|o| key.operation() == o)
        };

        let before = self.counters.len();
        // Refund records stay until their window expires, so a late retry of
        // a refund issued before the reset is still recognized.
        self.counters.retain(|key, _| !matches(key));
        let removed = before.saturating_sub(self.counters.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn cleanup_expired(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed: u64 = 0;
        self.counters.retain(|key, _| {
            let expired = key.expired_before(&older_than);
            if expired {
                removed += 1;
            }
            !expired
        });
        self.refunds
            .retain(|_, window_end| *window_end > older_than);
        Ok(removed)
    }
}
