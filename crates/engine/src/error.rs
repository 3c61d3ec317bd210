use std::time::Duration;

use thiserror::Error;

use turnstile_core::{CatalogError, SubjectError};
use turnstile_store::StoreError;

/// Errors returned by the admission engine.
///
/// A denial is not an error: it is an [`AdmissionResult`] with
/// `allowed == false`.
///
/// [`AdmissionResult`]: turnstile_core::AdmissionResult
#[derive(Debug, Error)]
pub enum EngineError {
    /// The subject identifier was rejected before reaching the store.
    #[error("invalid subject: {0}")]
    InvalidSubject(#[from] SubjectError),

    /// The platform is not present in the limit catalog.
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    /// A refund request was malformed.
    #[error("invalid refund: {0}")]
    InvalidRefund(String),

    /// The counter store could not be reached within the retry budget and
    /// the operation class fails closed.
    #[error("counter store unavailable, retry after {retry_after:?}")]
    StoreUnavailable {
        retry_after: Duration,
        #[source]
        source: StoreError,
    },

    /// The engine was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownPlatform(platform) => Self::UnknownPlatform(platform),
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl EngineError {
    /// Whether the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_platform_is_not_configuration() {
        let err = EngineError::from(CatalogError::UnknownPlatform("myspace".into()));
        assert!(matches!(err, EngineError::UnknownPlatform(ref p) if p == "myspace"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_unavailable_is_retryable() {
        let err = EngineError::StoreUnavailable {
            retry_after: Duration::from_secs(1),
            source: StoreError::Timeout(Duration::from_secs(2)),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("unavailable"));
    }
}
