use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use turnstile_core::Operation;

/// What an admission does when the counter store cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit without recording usage. Every such admission is logged at
    /// error level and counted.
    FailOpen,
    /// Refuse with [`EngineError::StoreUnavailable`].
    ///
    /// [`EngineError::StoreUnavailable`]: crate::EngineError::StoreUnavailable
    FailClosed,
}

/// Failure policy per operation class, with a default.
///
/// Has no `Default`: the policy must always be configured explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicies {
    pub default: FailurePolicy,
    #[serde(default)]
    pub overrides: BTreeMap<Operation, FailurePolicy>,
}

impl FailurePolicies {
    #[must_use]
    pub fn new(default: FailurePolicy) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Set the policy for one operation class.
    #[must_use]
    pub fn with_override(mut self, operation: impl Into<Operation>, policy: FailurePolicy) -> Self {
        self.overrides.insert(operation.into(), policy);
        self
    }

    /// The policy governing `operation`.
    #[must_use]
    pub fn for_operation(&self, operation: &Operation) -> FailurePolicy {
        self.overrides
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }
}
