use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Operation, Platform, Subject, Tier};
use crate::window::WindowKind;

/// The (platform, operation) pair being metered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub platform: Platform,
    pub operation: Operation,
}

impl Dimension {
    #[must_use]
    pub fn new(platform: impl Into<Platform>, operation: impl Into<Operation>) -> Self {
        Self {
            platform: platform.into(),
            operation: operation.into(),
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.platform, self.operation)
    }
}

/// The subscription facts supplied by billing for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Subscription tier identifier.
    pub tier: Tier,
    /// Instant the billing cycle is aligned to.
    pub cycle_anchor: DateTime<Utc>,
}

impl Plan {
    #[must_use]
    pub fn new(tier: impl Into<Tier>, cycle_anchor: DateTime<Utc>) -> Self {
        Self {
            tier: tier.into(),
            cycle_anchor,
        }
    }
}

/// Why an admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    #[serde(rename = "short-window exceeded")]
    ShortWindowExceeded,
    #[serde(rename = "cycle exceeded")]
    CycleExceeded,
}

impl DenialReason {
    /// The window whose ceiling caused the denial.
    #[must_use]
    pub fn window(self) -> WindowKind {
        match self {
            Self::ShortWindowExceeded => WindowKind::Short,
            Self::CycleExceeded => WindowKind::Cycle,
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortWindowExceeded => f.write_str("short-window exceeded"),
            Self::CycleExceeded => f.write_str("cycle exceeded"),
        }
    }
}

/// What a successful admission charged, so it can be refunded exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionTicket {
    /// Monotonic (UUID v7) id of the admission.
    pub admission_id: Uuid,
    pub subject: Subject,
    pub dimension: Dimension,
    pub short_window_start: DateTime<Utc>,
    pub cycle_window_start: DateTime<Utc>,
}

impl AdmissionTicket {
    /// Start of the window of `kind` charged by this admission.
    #[must_use]
    pub fn window_start(&self, kind: WindowKind) -> DateTime<Utc> {
        match kind {
            WindowKind::Short => self.short_window_start,
            WindowKind::Cycle => self.cycle_window_start,
        }
    }

    /// Idempotency key for refunding the `kind` window of this admission.
    #[must_use]
    pub fn refund_key(&self, kind: WindowKind) -> String {
        format!("{}:{kind}", self.admission_id)
    }
}

/// Outcome of an admission decision. Produced per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResult {
    pub allowed: bool,
    /// Admissions left before the tighter window denies.
    pub remaining: u64,
    /// When the relevant window resets.
    pub reset_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    /// Present when the store recorded the admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<AdmissionTicket>,
    /// Admitted without consulting the store because it was unavailable
    /// and the operation class is configured to fail open.
    #[serde(default)]
    pub fail_open: bool,
}

impl AdmissionResult {
    #[must_use]
    pub fn admitted(remaining: u64, reset_at: DateTime<Utc>, ticket: AdmissionTicket) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            reason: None,
            ticket: Some(ticket),
            fail_open: false,
        }
    }

    #[must_use]
    pub fn denied(reason: DenialReason, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            reason: Some(reason),
            ticket: None,
            fail_open: false,
        }
    }

    #[must_use]
    pub fn failed_open(reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: 0,
            reset_at,
            reason: None,
            ticket: None,
            fail_open: true,
        }
    }
}
