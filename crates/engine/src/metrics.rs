use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking admission engine outcomes.
///
/// All counters use relaxed ordering for maximum throughput. For a
/// consistent point-in-time view, call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Admission decisions requested.
    pub decisions: AtomicU64,
    /// Admissions recorded by the store.
    pub allowed: AtomicU64,
    /// Denials caused by the short window.
    pub denied_short_window: AtomicU64,
    /// Denials caused by the billing cycle.
    pub denied_cycle: AtomicU64,
    /// Admissions granted without the store under a fail-open policy.
    pub failed_open: AtomicU64,
    /// Requests refused because the store was unavailable.
    pub store_unavailable: AtomicU64,
    /// Store calls retried after a transient error.
    pub store_retries: AtomicU64,
    /// Refunds that decremented a counter.
    pub refunds_applied: AtomicU64,
    /// Refunds ignored because their key was already applied.
    pub refunds_duplicate: AtomicU64,
    /// Refunds that found no charged usage to release.
    pub refunds_unmatched: AtomicU64,
    /// Status reports served.
    pub status_reports: AtomicU64,
    /// Expired counter rows deleted by maintenance.
    pub windows_cleaned: AtomicU64,
}

impl EngineMetrics {
    pub fn increment_decisions(&self) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_denied_short_window(&self) {
        self.denied_short_window.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_denied_cycle(&self) {
        self.denied_cycle.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed_open(&self) {
        self.failed_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_store_unavailable(&self) {
        self.store_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_store_retries(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refunds_applied(&self) {
        self.refunds_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refunds_duplicate(&self) {
        self.refunds_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refunds_unmatched(&self) {
        self.refunds_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_status_reports(&self) {
        self.status_reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to the cleaned-windows counter.
    pub fn add_windows_cleaned(&self, n: u64) {
        self.windows_cleaned.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a consistent point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            decisions: self.decisions.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied_short_window: self.denied_short_window.load(Ordering::Relaxed),
            denied_cycle: self.denied_cycle.load(Ordering::Relaxed),
            failed_open: self.failed_open.load(Ordering::Relaxed),
            store_unavailable: self.store_unavailable.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            refunds_applied: self.refunds_applied.load(Ordering::Relaxed),
            refunds_duplicate: self.refunds_duplicate.load(Ordering::Relaxed),
            refunds_unmatched: self.refunds_unmatched.load(Ordering::Relaxed),
            status_reports: self.status_reports.load(Ordering::Relaxed),
            windows_cleaned: self.windows_cleaned.load(Ordering::Relaxed),
        }
    }
}

/// A plain-data snapshot of [`EngineMetrics`] at a single point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineMetricsSnapshot {
    pub decisions: u64,
    pub allowed: u64,
    pub denied_short_window: u64,
    pub denied_cycle: u64,
    pub failed_open: u64,
    pub store_unavailable: u64,
    pub store_retries: u64,
    pub refunds_applied: u64,
    pub refunds_duplicate: u64,
    pub refunds_unmatched: u64,
    pub status_reports: u64,
    pub windows_cleaned: u64,
}
