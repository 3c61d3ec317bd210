use thiserror::Error;

/// Errors from counter store operations.
///
/// A denial is never an error: it is reported as
/// [`Admission::admitted`](crate::Admission) being `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("lock contention: {0}")]
    LockContention(String),

    #[error("rate limited by store: {0}")]
    RateLimited(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// Lock timeouts, dropped connections and store-side throttling are
    /// transient. Corrupt rows and statement errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::LockContention(_) | Self::RateLimited(_)
        )
    }
}
