use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use turnstile_store::StoreError;

use crate::metrics::EngineMetrics;

/// Bounded exponential backoff for store calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each later retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Upper bound on a single store call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
            call_timeout: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay before retry number `attempt` (zero-based):
    /// `base * 2^attempt`, clamped to `max_delay`.
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retry number `attempt`, drawn uniformly from the upper
    /// half of [`ceiling_for`](Self::ceiling_for) so concurrent callers that
    /// failed together do not retry together.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for(attempt);
        let factor: f64 = rand::rng().random_range(0.5..=1.0);
        ceiling.mul_f64(factor)
    }
}

/// Runs store calls under a per-call timeout, retrying transient failures.
///
/// A denial is a successful store call and is never retried. Errors that
/// are not [transient](StoreError::is_transient) are returned immediately.
#[derive(Debug)]
pub struct ContentionController {
    policy: RetryPolicy,
    metrics: Arc<EngineMetrics>,
}

impl ContentionController {
    pub fn new(policy: RetryPolicy, metrics: Arc<EngineMetrics>) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Hint for how long a refused caller should wait before trying again.
    pub fn retry_after(&self) -> Duration {
        self.policy.max_delay.max(Duration::from_secs(1))
    }

    /// Call `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent.
    pub async fn run<T, F, Fut>(&self, label: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let result = match tokio::time::timeout(self.policy.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.policy.call_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient store error, retrying"
                    );
                    self.metrics.increment_store_retries();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
