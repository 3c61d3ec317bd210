use std::num::NonZeroU64;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Granularity of a counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Short rolling window, epoch-aligned (hourly by default).
    Short,
    /// Billing-cycle window, aligned to the subscription's cycle anchor.
    Cycle,
}

impl WindowKind {
    /// Return a short label for display and key generation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Cycle => "cycle",
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WindowKind {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(Self::Short),
            "cycle" => Ok(Self::Cycle),
            other => Err(WindowError::UnknownKind(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("{0} window period must be greater than 0 seconds")]
    ZeroPeriod(WindowKind),

    #[error("unknown window kind: {0}")]
    UnknownKind(String),
}

/// A concrete counting window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Whether `instant` falls inside this window.
    #[must_use]
    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start && *instant < self.end
    }
}

/// Window periods used by the admission engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    short_period: NonZeroU64,
    cycle_period: NonZeroU64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            short_period: NonZeroU64::new(3_600).unwrap_or(NonZeroU64::MIN),
            cycle_period: NonZeroU64::new(2_592_000).unwrap_or(NonZeroU64::MIN),
        }
    }
}

impl WindowConfig {
    /// Build a window configuration from period lengths in seconds.
    pub fn new(short_seconds: u64, cycle_seconds: u64) -> Result<Self, WindowError> {
        let short_period =
            NonZeroU64::new(short_seconds).ok_or(WindowError::ZeroPeriod(WindowKind::Short))?;
        let cycle_period =
            NonZeroU64::new(cycle_seconds).ok_or(WindowError::ZeroPeriod(WindowKind::Cycle))?;
        Ok(Self {
            short_period,
            cycle_period,
        })
    }

    /// Length of the short window in seconds.
    #[must_use]
    pub fn short_seconds(&self) -> u64 {
        self.short_period.get()
    }

    /// Length of the billing-cycle window in seconds.
    #[must_use]
    pub fn cycle_seconds(&self) -> u64 {
        self.cycle_period.get()
    }

    /// The short window containing `now`.
    ///
    /// Windows are aligned to the Unix epoch so every instance agrees on the
    /// boundaries without coordination.
    #[must_use]
    pub fn short_window(&self, now: &DateTime<Utc>) -> Window {
        let (start, end) = aligned(DateTime::UNIX_EPOCH, self.short_period, now);
        Window {
            kind: WindowKind::Short,
            start,
            end,
        }
    }

    /// The billing-cycle window containing `now`, aligned to `anchor`.
    ///
    /// An anchor in the future still yields the window containing `now`
    /// (counting backwards from the anchor).
    #[must_use]
    pub fn cycle_window(&self, anchor: &DateTime<Utc>, now: &DateTime<Utc>) -> Window {
        let (start, end) = aligned(*anchor, self.cycle_period, now);
        Window {
            kind: WindowKind::Cycle,
            start,
            end,
        }
    }

    /// The window of the given kind containing `now`.
    #[must_use]
    pub fn window(&self, kind: WindowKind, anchor: &DateTime<Utc>, now: &DateTime<Utc>) -> Window {
        match kind {
            WindowKind::Short => self.short_window(now),
            WindowKind::Cycle => self.cycle_window(anchor, now),
        }
    }

    /// Recover the window of `kind` that starts at `start`.
    #[must_use]
    pub fn window_at(&self, kind: WindowKind, start: DateTime<Utc>) -> Window {
        let period = match kind {
            WindowKind::Short => self.short_period,
            WindowKind::Cycle => self.cycle_period,
        };
        Window {
            kind,
            start,
            end: start + seconds(period),
        }
    }
}

fn seconds(period: NonZeroU64) -> Duration {
    Duration::seconds(i64::try_from(period.get()).unwrap_or(i64::MAX))
}

fn aligned(
    origin: DateTime<Utc>,
    period: NonZeroU64,
    now: &DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let period_ms = i64::try_from(period.get())
        .unwrap_or(i64::MAX)
        .saturating_mul(1_000);
    let elapsed_ms = now.signed_duration_since(origin).num_milliseconds();
    let mut index = elapsed_ms.div_euclid(period_ms);

    // Sub-millisecond offsets are truncated above; settle on the window that
    // actually contains `now`.
    let start_of = |index: i64| origin + Duration::milliseconds(index.saturating_mul(period_ms));
    if start_of(index) > *now {
        index -= 1;
    } else if start_of(index + 1) <= *now {
        index += 1;
    }
    let start = start_of(index);
    (start, start_of(index + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn default_periods() {
        let cfg = WindowConfig::default();
        assert_eq!(cfg.short_seconds(), 3_600);
        assert_eq!(cfg.cycle_seconds(), 2_592_000);
    }

    #[test]
    fn zero_periods_rejected() {
        assert_eq!(
            WindowConfig::new(0, 10),
            Err(WindowError::ZeroPeriod(WindowKind::Short))
        );
        assert_eq!(
            WindowConfig::new(10, 0),
            Err(WindowError::ZeroPeriod(WindowKind::Cycle))
        );
    }

    #[test]
    fn short_window_is_hour_aligned() {
        let cfg = WindowConfig::default();
        let w = cfg.short_window(&at("2026-02-10T14:30:00Z"));
        assert_eq!(w.kind, WindowKind::Short);
        assert_eq!(w.start, at("2026-02-10T14:00:00Z"));
        assert_eq!(w.end, at("2026-02-10T15:00:00Z"));
    }

    #[test]
    fn short_window_boundary_belongs_to_next_window() {
        let cfg = WindowConfig::default();
        let w = cfg.short_window(&at("2026-02-10T15:00:00Z"));
        assert_eq!(w.start, at("2026-02-10T15:00:00Z"));
        assert!(w.contains(&at("2026-02-10T15:59:59Z")));
        assert!(!w.contains(&at("2026-02-10T16:00:00Z")));
    }

    #[test]
    fn cycle_window_follows_anchor() {
        let cfg = WindowConfig::default();
        let anchor = at("2026-01-05T09:15:00Z");
        let w = cfg.cycle_window(&anchor, &at("2026-02-10T14:30:00Z"));
        assert_eq!(w.start, at("2026-02-04T09:15:00Z"));
        assert_eq!(w.end, at("2026-03-06T09:15:00Z"));
    }

    #[test]
    fn cycle_window_with_future_anchor() {
        let cfg = WindowConfig::default();
        let anchor = at("2026-03-01T00:00:00Z");
        let now = at("2026-02-10T00:00:00Z");
        let w = cfg.cycle_window(&anchor, &now);
        assert!(w.contains(&now));
        assert_eq!(w.end, at("2026-03-01T00:00:00Z"));
    }

    #[test]
    fn cycle_window_contains_now_when_anchor_is_just_ahead() {
        let cfg = WindowConfig::default();
        let now = at("2026-02-10T12:00:00Z");
        for offset in [
            Duration::nanoseconds(1),
            Duration::microseconds(500),
            Duration::milliseconds(400),
            Duration::milliseconds(999),
        ] {
            let anchor = now + offset;
            let w = cfg.cycle_window(&anchor, &now);
            assert!(w.contains(&now), "anchor {offset} ahead of now");
            assert_eq!(w.end, anchor);
        }
    }

    #[test]
    fn cycle_window_with_sub_second_anchor() {
        let cfg = WindowConfig::new(60, 10).unwrap();
        let anchor = at("2026-02-10T12:00:00.250Z");
        let now = at("2026-02-10T12:00:10.100Z");
        let w = cfg.cycle_window(&anchor, &now);
        assert_eq!(w.start, at("2026-02-10T12:00:00.250Z"));
        assert!(w.contains(&now));
        let next = cfg.cycle_window(&anchor, &at("2026-02-10T12:00:10.250Z"));
        assert_eq!(next.start, at("2026-02-10T12:00:10.250Z"));
    }

    #[test]
    fn window_at_recovers_end() {
        let cfg = WindowConfig::new(60, 600).unwrap();
        let start = at("2026-02-10T14:00:00Z");
        let w = cfg.window_at(WindowKind::Cycle, start);
        assert_eq!(w.end, at("2026-02-10T14:10:00Z"));
    }

    #[test]
    fn window_kind_parse_and_display() {
        assert_eq!("short".parse::<WindowKind>(), Ok(WindowKind::Short));
        assert_eq!("cycle".parse::<WindowKind>(), Ok(WindowKind::Cycle));
        assert!("daily".parse::<WindowKind>().is_err());
        assert_eq!(WindowKind::Cycle.to_string(), "cycle");
    }
}
