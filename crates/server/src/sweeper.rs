use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use turnstile_engine::AdmissionEngine;

/// Spawn the periodic deletion of windows that ended more than `retention`
/// ago. The first sweep runs one `interval` after startup.
pub fn spawn(
    engine: Arc<AdmissionEngine>,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so we don't sweep
        // at startup.
        timer.tick().await;
        loop {
            timer.tick().await;
            sweep_once(&engine, retention).await;
        }
    })
}

/// Run one sweep, returning the number of windows removed.
pub async fn sweep_once(engine: &AdmissionEngine, retention: Duration) -> u64 {
    let Ok(retention) = chrono::Duration::from_std(retention) else {
        warn!("retention period out of range, skipping sweep");
        return 0;
    };
    match engine.cleanup_expired_windows(Utc::now() - retention).await {
        Ok(0) => 0,
        Ok(n) => {
            info!(removed = n, "sweep removed expired windows");
            n
        }
        Err(e) => {
            warn!(error = %e, "expired window sweep failed");
            0
        }
    }
}
