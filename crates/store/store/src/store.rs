use async_trait::async_trait;
use chrono::{DateTime, Utc};

use turnstile_core::{Operation, Platform, RefundOutcome, Subject, UsageCounter};

use crate::error::StoreError;
use crate::key::{CounterBound, CounterKey};

/// Result of a single check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The counter value after the call (unchanged when denied).
    pub count: u64,
    pub admitted: bool,
}

/// Result of evaluating several bounds as one logical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAdmission {
    /// Every bound admitted; new counts in the order given.
    Admitted(Vec<u64>),
    /// The bound at `index` was at its ceiling. No increment from this call
    /// remains applied.
    Denied { index: usize, count: u64 },
}

/// Durable storage of usage counters.
///
/// Implementations must be `Send + Sync` and correct when shared by many
/// tasks and many processes: two concurrent callers against the same row
/// must never both be admitted past its ceiling.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically compare the counter against `ceiling` and increment it when
    /// `count < ceiling`. An absent row is created with `count = 1` (when
    /// `ceiling >= 1`). A denial leaves the row untouched.
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        ceiling: u64,
    ) -> Result<Admission, StoreError>;

    /// Evaluate `bounds` in order as one logical admission.
    ///
    /// The default implementation calls [`check_and_increment`] for each bound
    /// and, on a denial or an error, decrements every bound it already
    /// incremented. Backends that can hold all rows in one transaction should
    /// override this.
    ///
    /// [`check_and_increment`]: CounterStore::check_and_increment
    async fn admit_all(&self, bounds: &[CounterBound]) -> Result<BatchAdmission, StoreError> {
        let mut counts = Vec::with_capacity(bounds.len());
        let mut stopped = None;

        for (index, bound) in bounds.iter().enumerate() {
            match self.check_and_increment(&bound.key, bound.ceiling).await {
                Ok(admission) if admission.admitted => counts.push(admission.count),
                Ok(admission) => {
                    stopped = Some(Ok(BatchAdmission::Denied {
                        index,
                        count: admission.count,
                    }));
                    break;
                }
                Err(e) => {
                    stopped = Some(Err(e));
                    break;
                }
            }
        }

        let Some(outcome) = stopped else {
            return Ok(BatchAdmission::Admitted(counts));
        };

        // Undo the increments that did commit, newest first.
        for bound in bounds[..counts.len()].iter().rev() {
            if let Err(e) = self.decrement(&bound.key).await {
                tracing::error!(
                    key = %bound.key,
                    error = %e,
                    "failed to compensate partial admission, usage leaked"
                );
                return Err(e);
            }
        }

        outcome
    }

    /// Atomically decrement a counter, flooring at zero. A missing row is a
    /// no-op. Returns the value after the call.
    async fn decrement(&self, key: &CounterKey) -> Result<u64, StoreError>;

    /// Decrement once per `idempotency_key`.
    ///
    /// The key is recorded in the same atomic unit as the decrement, so a
    /// repeated refund returns [`RefundOutcome::AlreadyRefunded`] without
    /// touching the counter. When the row is absent or already at zero the
    /// call returns [`RefundOutcome::NothingToRefund`] and records nothing.
    async fn refund(
        &self,
        key: &CounterKey,
        idempotency_key: &str,
    ) -> Result<RefundOutcome, StoreError>;

    /// Read one counter. Never creates a row.
    async fn get(&self, key: &CounterKey) -> Result<Option<UsageCounter>, StoreError>;

    /// Read every counter held by `subject`. Never creates rows.
    async fn counters_for(&self, subject: &Subject) -> Result<Vec<UsageCounter>, StoreError>;

    /// Delete counters for `subject`, optionally narrowed to a platform and
    /// operation. Returns the number of rows removed. Refund records are left
    /// for [`CounterStore::cleanup_expired`].
    async fn reset(
        &self,
        subject: &Subject,
        platform: Option<&Platform>,
        operation: Option<&Operation>,
    ) -> Result<u64, StoreError>;

    /// Delete counters and refund records whose window ended at or before
    /// `older_than`. Returns the number of counters removed.
    async fn cleanup_expired(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
