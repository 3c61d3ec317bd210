use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admission::Dimension;
use crate::types::Subject;
use crate::window::WindowKind;

/// The durable unit of truth: usage of one dimension in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub subject: Subject,
    pub dimension: Dimension,
    pub window: WindowKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Result of a refund against a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefundOutcome {
    /// The counter was credited; `count` is the value after the refund.
    Refunded { count: u64 },
    /// A refund with the same idempotency key was already applied.
    AlreadyRefunded,
    /// The window holds no usage to credit: the counter row is absent or
    /// already at zero. Nothing was changed and the idempotency key was not
    /// recorded.
    NothingToRefund,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refund_outcome_wire_format() {
        let json = serde_json::to_value(RefundOutcome::Refunded { count: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "refunded", "count": 3 }));
        let json = serde_json::to_value(RefundOutcome::AlreadyRefunded).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "already_refunded" }));
        let json = serde_json::to_value(RefundOutcome::NothingToRefund).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "nothing_to_refund" }));
    }
}
