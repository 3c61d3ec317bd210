use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use turnstile_core::{Operation, Platform, Subject, validate_subject};

use crate::engine::AdmissionEngine;
use crate::error::EngineError;

impl AdmissionEngine {
    /// Delete `subject`'s counters, optionally narrowed to one platform and
    /// operation. Returns the number of counters removed.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidSubject`] for a malformed subject and
    /// [`EngineError::StoreUnavailable`] when the store cannot be reached.
    #[instrument(name = "engine.reset", skip_all, fields(subject = %subject))]
    pub async fn reset(
        &self,
        subject: &Subject,
        platform: Option<&Platform>,
        operation: Option<&Operation>,
    ) -> Result<u64, EngineError> {
        validate_subject(subject)?;

        let store = &self.store;
        let deleted = self
            .retry
            .run("reset", move || store.reset(subject, platform, operation))
            .await
            .map_err(|e| self.unavailable(e))?;

        self.status.invalidate();
        info!(
            deleted,
            platform = platform.map(Platform::as_str),
            operation = operation.map(Operation::as_str),
            "counters reset"
        );
        Ok(deleted)
    }

    /// Delete every counter whose window ended at or before `older_than`.
    ///
    /// A cutoff in the future is clamped to now, so live windows are never
    /// removed.
    ///
    /// # Errors
    ///
    /// [`EngineError::StoreUnavailable`] when the store cannot be reached.
    #[instrument(name = "engine.cleanup", skip(self))]
    pub async fn cleanup_expired_windows(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<u64, EngineError> {
        let now = Utc::now();
        if older_than > now {
            warn!(%older_than, "cleanup cutoff is in the future, clamping to now");
        }
        let older_than = older_than.min(now);

        let store = &self.store;
        let deleted = self
            .retry
            .run("cleanup_expired", move || store.cleanup_expired(older_than))
            .await
            .map_err(|e| self.unavailable(e))?;

        self.metrics.add_windows_cleaned(deleted);
        if deleted > 0 {
            info!(deleted, "expired windows cleaned up");
        }
        Ok(deleted)
    }
}
