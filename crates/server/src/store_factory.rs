use std::sync::Arc;
#[cfg(feature = "postgres")]
use std::time::Duration;

use turnstile_store::CounterStore;
use turnstile_store_memory::MemoryCounterStore;
#[cfg(feature = "postgres")]
use turnstile_store_postgres::{PostgresConfig, PostgresCounterStore};

use crate::config::StoreConfig;
use crate::error::ServerError;

/// Create a counter store from the given configuration.
///
/// The postgres backend connects and brings its schema up to date before
/// returning.
#[allow(clippy::unused_async)]
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, ServerError> {
    let store: Arc<dyn CounterStore> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryCounterStore::new()),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.as_deref().ok_or_else(|| {
                ServerError::Config("postgres backend requires [store] url".into())
            })?;

            let pg_config = PostgresConfig {
                url: url.to_owned(),
                pool_size: config.pool_size,
                acquire_timeout: Duration::from_secs(config.acquire_timeout_seconds),
                schema: config.schema.clone(),
                table_prefix: config.table_prefix.clone(),
                lock_timeout: Duration::from_millis(config.lock_timeout_ms),
                ssl_mode: config.ssl_mode.clone(),
                ssl_root_cert: config.ssl_root_cert.clone(),
                ssl_cert: config.ssl_cert.clone(),
                ssl_key: config.ssl_key.clone(),
            };

            let store = PostgresCounterStore::new(pg_config)
                .await
                .map_err(|e| ServerError::Config(format!("postgres store: {e}")))?;

            Arc::new(store)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported store backend: {other}"
            )));
        }
    };

    Ok(store)
}
