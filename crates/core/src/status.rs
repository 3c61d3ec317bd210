use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Operation, Platform, Subject, Tier};

/// Usage of one dimension in one window, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    /// Share of the ceiling consumed, `0.0..=100.0`.
    pub percentage: f64,
    pub resets_at: DateTime<Utc>,
}

impl WindowUsage {
    #[must_use]
    pub fn new(used: u64, limit: u64, resets_at: DateTime<Utc>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let percentage = if limit == 0 {
            100.0
        } else {
            ((used as f64 / limit as f64) * 100.0).min(100.0)
        };
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            percentage,
            resets_at,
        }
    }
}

/// Current usage of one operation at both granularities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub short: WindowUsage,
    pub cycle: WindowUsage,
}

/// Read-only projection of a subject's quota across all tracked dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub subject: Subject,
    /// The tier whose ceilings were applied (the fallback tier when the
    /// requested one is unknown).
    pub tier: Tier,
    pub generated_at: DateTime<Utc>,
    pub platforms: BTreeMap<Platform, BTreeMap<Operation, OperationStatus>>,
}

impl StatusReport {
    /// Look up one dimension's status.
    #[must_use]
    pub fn get(&self, platform: &str, operation: &str) -> Option<&OperationStatus> {
        self.platforms
            .get(&Platform::from(platform))
            .and_then(|ops| ops.get(&Operation::from(operation)))
    }
}
