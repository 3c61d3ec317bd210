use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use turnstile_core::{Dimension, Operation, Platform, Subject, Window, WindowKind};

/// Addresses one usage counter row: (subject, dimension, window).
///
/// The window end is carried along so backends can persist it for
/// retention; it is always derived from the window start and kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub subject: Subject,
    pub dimension: Dimension,
    pub window: WindowKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl CounterKey {
    /// Create a new counter key.
    #[must_use]
    pub fn new(subject: impl Into<Subject>, dimension: Dimension, window: &Window) -> Self {
        Self {
            subject: subject.into(),
            dimension,
            window: window.kind,
            window_start: window.start,
            window_end: window.end,
        }
    }

    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.dimension.platform
    }

    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.dimension.operation
    }

    /// Render a human-readable form for logs.
    ///
    /// Format: `{subject}:{platform}/{operation}:{window}@{start}`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "{}:{}:{}@{}",
            self.subject,
            self.dimension,
            self.window,
            self.window_start.timestamp()
        )
    }

    /// Whether this key's window ended at or before `cutoff`.
    #[must_use]
    pub fn expired_before(&self, cutoff: &DateTime<Utc>) -> bool {
        self.window_end <= *cutoff
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// A counter together with the ceiling it is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterBound {
    pub key: CounterKey,
    pub ceiling: u64,
}

impl CounterBound {
    #[must_use]
    pub fn new(key: CounterKey, ceiling: u64) -> Self {
        Self { key, ceiling }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use turnstile_core::WindowConfig;

    #[test]
    fn canonical_format() {
        let now = DateTime::parse_from_rfc3339("2026-02-10T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let window = WindowConfig::default().short_window(&now);
        let key = CounterKey::new("user-1", Dimension::new("facebook", "post"), &window);
        assert_eq!(
            key.canonical(),
            format!("user-1:facebook/post:short@{}", window.start.timestamp())
        );
    }

    #[test]
    fn same_start_different_kind_is_a_different_row() {
        let now = Utc::now();
        let cfg = WindowConfig::default();
        let short = cfg.short_window(&now);
        // Anchor the cycle on the short window start so both begin together.
        let cycle = cfg.cycle_window(&short.start, &now);
        assert_eq!(short.start, cycle.start);

        let dim = Dimension::new("facebook", "post");
        let a = CounterKey::new("user-1", dim.clone(), &short);
        let b = CounterKey::new("user-1", dim, &cycle);
        assert_ne!(a, b);
    }
}
