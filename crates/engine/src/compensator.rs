use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use turnstile_core::{
    AdmissionTicket, Dimension, Operation, Platform, RefundOutcome, Subject, WindowKind,
    validate_subject,
};
use turnstile_store::CounterKey;

use crate::engine::AdmissionEngine;
use crate::error::EngineError;

/// Outcome of refunding both windows charged by one admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TicketRefund {
    pub short: RefundOutcome,
    pub cycle: RefundOutcome,
}

impl AdmissionEngine {
    /// Credit one unit back to the `window` starting at `window_start`.
    ///
    /// The refund lands on the window the admission was charged to, not the
    /// current one. Repeating it with the same `idempotency_key` returns
    /// [`RefundOutcome::AlreadyRefunded`] and changes nothing. A window with no
    /// charged usage returns [`RefundOutcome::NothingToRefund`] and the key is
    /// not consumed.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidSubject`], [`EngineError::UnknownPlatform`] or
    /// [`EngineError::InvalidRefund`] for malformed input (including a short
    /// `window_start` off the window grid), and
    /// [`EngineError::StoreUnavailable`] when the store cannot be reached.
    #[instrument(
        name = "engine.refund",
        skip_all,
        fields(
            subject = %subject,
            platform = %platform,
            operation = %operation,
            window = %window,
            window_start = %window_start,
        )
    )]
    pub async fn refund(
        &self,
        subject: &Subject,
        platform: &Platform,
        operation: &Operation,
        window: WindowKind,
        window_start: DateTime<Utc>,
        idempotency_key: &str,
    ) -> Result<RefundOutcome, EngineError> {
        validate_subject(subject)?;
        if !self.catalog.knows_platform(platform) {
            return Err(EngineError::UnknownPlatform(platform.to_string()));
        }
        if idempotency_key.trim().is_empty() {
            return Err(EngineError::InvalidRefund(
                "idempotency key must not be empty".into(),
            ));
        }

        let on_grid = self.windows.short_window(&window_start).start == window_start;
        if window == WindowKind::Short && !on_grid {
            return Err(EngineError::InvalidRefund(
                "short window_start is not aligned to a window boundary".into(),
            ));
        }

        let charged = self.windows.window_at(window, window_start);
        let key = CounterKey::new(
            subject.clone(),
            Dimension::new(platform.clone(), operation.clone()),
            &charged,
        );

        let store = &self.store;
        let key_ref = &key;
        let outcome = self
            .retry
            .run("refund", move || store.refund(key_ref, idempotency_key))
            .await
            .map_err(|e| self.unavailable(e))?;

        match outcome {
            RefundOutcome::Refunded { count } => {
                self.metrics.increment_refunds_applied();
                info!(count, "usage refunded");
            }
            RefundOutcome::AlreadyRefunded => {
                self.metrics.increment_refunds_duplicate();
                info!("refund already applied");
            }
            RefundOutcome::NothingToRefund => {
                self.metrics.increment_refunds_unmatched();
                warn!("refund found no charged usage");
            }
        }
        Ok(outcome)
    }

    /// Refund both windows charged by `ticket`.
    ///
    /// The idempotency keys are derived from the ticket's admission id, so
    /// refunding the same ticket twice credits each window once.
    ///
    /// # Errors
    ///
    /// As for [`refund`](Self::refund). When the cycle refund fails after the
    /// short refund succeeded, calling again completes the cycle refund
    /// without double-crediting the short window.
    pub async fn refund_ticket(&self, ticket: &AdmissionTicket) -> Result<TicketRefund, EngineError> {
        let mut outcomes = [RefundOutcome::AlreadyRefunded; 2];
        for (slot, kind) in outcomes.iter_mut().zip([WindowKind::Short, WindowKind::Cycle]) {
            *slot = self
                .refund(
                    &ticket.subject,
                    &ticket.dimension.platform,
                    &ticket.dimension.operation,
                    kind,
                    ticket.window_start(kind),
                    &ticket.refund_key(kind),
                )
                .await?;
        }
        let [short, cycle] = outcomes;
        Ok(TicketRefund { short, cycle })
    }
}
