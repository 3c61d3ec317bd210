use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::debug;

use turnstile_core::{
    Dimension, Operation, Platform, RefundOutcome, Subject, UsageCounter, WindowKind,
};
use turnstile_store::error::StoreError;
use turnstile_store::key::{CounterBound, CounterKey};
use turnstile_store::store::{Admission, BatchAdmission, CounterStore};

use crate::config::PostgresConfig;
use crate::migrations;

type CounterRow = (
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    i64,
    DateTime<Utc>,
);

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
pub(crate) fn build_connect_options(
    config: &PostgresConfig,
) -> Result<sqlx::postgres::PgConnectOptions, StoreError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| StoreError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(StoreError::Connection(format!("unknown ssl_mode: {other}")));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    if let Some(ref path) = config.ssl_cert {
        options = options.ssl_client_cert(path);
    }

    if let Some(ref path) = config.ssl_key {
        options = options.ssl_client_key(path);
    }

    Ok(options)
}

/// Map a `sqlx` error onto the store error taxonomy.
///
/// Serialization failures, deadlocks and lock timeouts are transient and
/// surface as contention; connection-level failures surface as
/// [`StoreError::Connection`] so the caller may retry.
fn classify(error: sqlx::Error, lock_timeout: Duration) -> StoreError {
    match &error {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(lock_timeout),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(error.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001" | "40P01") => StoreError::LockContention(db.message().to_owned()),
            // lock_not_available (lock_timeout), query_canceled (statement_timeout)
            Some("55P03" | "57014") => StoreError::Timeout(lock_timeout),
            // too_many_connections
            Some("53300") => StoreError::RateLimited(db.message().to_owned()),
            Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                StoreError::Connection(db.message().to_owned())
            }
            _ => StoreError::Backend(error.to_string()),
        },
        _ => StoreError::Backend(error.to_string()),
    }
}

fn count_to_u64(count: i64) -> Result<u64, StoreError> {
    u64::try_from(count)
        .map_err(|_| StoreError::Serialization(format!("negative counter value: {count}")))
}

fn row_to_counter(row: CounterRow) -> Result<UsageCounter, StoreError> {
    let (subject, platform, operation, kind, window_start, window_end, count, updated_at) = row;
    let window: WindowKind = kind
        .parse()
        .map_err(|e: turnstile_core::WindowError| StoreError::Serialization(e.to_string()))?;
    Ok(UsageCounter {
        subject: Subject::new(subject),
        dimension: Dimension::new(platform, operation),
        window,
        window_start,
        window_end,
        count: count_to_u64(count)?,
        updated_at,
    })
}

/// PostgreSQL-backed implementation of [`CounterStore`].
///
/// Every admission runs inside a transaction: the row is created with
/// `INSERT ... ON CONFLICT DO NOTHING`, then locked with `SELECT ... FOR
/// UPDATE` before the ceiling comparison, so concurrent callers on one row
/// are serialized by the database and a denial rolls back with no effect.
/// Lock waits are bounded by `SET LOCAL lock_timeout`.
pub struct PostgresCounterStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresCounterStore {
    /// Create a new `PostgresCounterStore` from the provided configuration.
    ///
    /// Connects to `PostgreSQL`, creates the connection pool, and runs
    /// migrations to ensure the required tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Create a `PostgresCounterStore` from an existing pool and config.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    fn map_err(&self) -> impl Fn(sqlx::Error) -> StoreError + '_ {
        move |e| classify(e, self.config.lock_timeout)
    }

    /// Begin a transaction with the configured lock timeout applied.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(self.map_err())?;
        // Integer interpolation only; SET does not accept bind parameters.
        let set_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.config.lock_timeout_ms()
        );
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(self.map_err())?;
        Ok(tx)
    }

    /// Create-if-absent, lock, compare and increment one row on `conn`.
    ///
    /// The caller owns the transaction and decides whether to commit.
    async fn admit_in(
        &self,
        conn: &mut PgConnection,
        key: &CounterKey,
        ceiling: u64,
    ) -> Result<Admission, StoreError> {
        let table = self.config.counters_table();

        let insert = format!(
            "INSERT INTO {table} \
             (subject, platform, operation, window_kind, window_start, window_end, count, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 0, NOW()) \
             ON CONFLICT DO NOTHING"
        );
        sqlx::query(&insert)
            .bind(key.subject.as_str())
            .bind(key.platform().as_str())
            .bind(key.operation().as_str())
            .bind(key.window.as_str())
            .bind(key.window_start)
            .bind(key.window_end)
            .execute(&mut *conn)
            .await
            .map_err(self.map_err())?;

        let lock = format!(
            "SELECT count FROM {table} \
             WHERE subject = $1 AND platform = $2 AND operation = $3 \
             AND window_kind = $4 AND window_start = $5 \
             FOR UPDATE"
        );
        let (current,): (i64,) = sqlx::query_as(&lock)
            .bind(key.subject.as_str())
            .bind(key.platform().as_str())
            .bind(key.operation().as_str())
            .bind(key.window.as_str())
            .bind(key.window_start)
            .fetch_one(&mut *conn)
            .await
            .map_err(self.map_err())?;
        let current = count_to_u64(current)?;

        if current >= ceiling {
            return Ok(Admission {
                count: current,
                admitted: false,
            });
        }

        let update = format!(
            "UPDATE {table} SET count = count + 1, updated_at = NOW() \
             WHERE subject = $1 AND platform = $2 AND operation = $3 \
             AND window_kind = $4 AND window_start = $5 \
             RETURNING count"
        );
        let (count,): (i64,) = sqlx::query_as(&update)
            .bind(key.subject.as_str())
            .bind(key.platform().as_str())
            .bind(key.operation().as_str())
            .bind(key.window.as_str())
            .bind(key.window_start)
            .fetch_one(&mut *conn)
            .await
            .map_err(self.map_err())?;

        Ok(Admission {
            count: count_to_u64(count)?,
            admitted: true,
        })
    }

    async fn decrement_in(
        &self,
        conn: &mut PgConnection,
        key: &CounterKey,
    ) -> Result<u64, StoreError> {
        let table = self.config.counters_table();
        let query = format!(
            "UPDATE {table} SET count = GREATEST(count - 1, 0), updated_at = NOW() \
             WHERE subject = $1 AND platform = $2 AND operation = $3 \
             AND window_kind = $4 AND window_start = $5 \
             RETURNING count"
        );
        let row: Option<(i64,)> = sqlx::query_as(&query)
            .bind(key.subject.as_str())
            .bind(key.platform().as_str())
            .bind(key.operation().as_str())
            .bind(key.window.as_str())
            .bind(key.window_start)
            .fetch_optional(&mut *conn)
            .await
            .map_err(self.map_err())?;

        row.map_or(Ok(0), |(count,)| count_to_u64(count))
    }
}

#[async_trait]
impl CounterStore for PostgresCounterStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        ceiling: u64,
    ) -> Result<Admission, StoreError> {
        let mut tx = self.begin().await?;
        let admission = self.admit_in(&mut tx, key, ceiling).await?;

        if admission.admitted {
            tx.commit().await.map_err(self.map_err())?;
        } else {
            // Drops the placeholder row if this call created it.
            tx.rollback().await.map_err(self.map_err())?;
        }
        Ok(admission)
    }

    async fn admit_all(&self, bounds: &[CounterBound]) -> Result<BatchAdmission, StoreError> {
        let mut tx = self.begin().await?;
        let mut counts = Vec::with_capacity(bounds.len());

        for (index, bound) in bounds.iter().enumerate() {
            let admission = self.admit_in(&mut tx, &bound.key, bound.ceiling).await?;
            if !admission.admitted {
                tx.rollback().await.map_err(self.map_err())?;
                debug!(key = %bound.key, index, "batch admission denied, rolled back");
                return Ok(BatchAdmission::Denied {
                    index,
                    count: admission.count,
                });
            }
            counts.push(admission.count);
        }

        tx.commit().await.map_err(self.map_err())?;
        Ok(BatchAdmission::Admitted(counts))
    }

    async fn decrement(&self, key: &CounterKey) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(self.map_err())?;
        self.decrement_in(&mut conn, key).await
    }

    async fn refund(
        &self,
        key: &CounterKey,
        idempotency_key: &str,
    ) -> Result<RefundOutcome, StoreError> {
        let refunds = self.config.refunds_table();
        let mut tx = self.begin().await?;

        let record = format!(
            "INSERT INTO {refunds} \
             (subject, platform, operation, window_kind, window_start, idempotency_key, window_end) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT DO NOTHING"
        );
        let inserted = sqlx::query(&record)
            .bind(key.subject.as_str())
            .bind(key.platform().as_str())
            .bind(key.operation().as_str())
            .bind(key.window.as_str())
            .bind(key.window_start)
            .bind(idempotency_key)
            .bind(key.window_end)
            .execute(&mut *tx)
            .await
            .map_err(self.map_err())?
            .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(self.map_err())?;
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        let table = self.config.counters_table();
        let release = format!(
            "UPDATE {table} SET count = count - 1, updated_at = NOW() \
             WHERE subject = $1 AND platform = $2 AND operation = $3 \
             AND window_kind = $4 AND window_start = $5 AND count > 0 \
             RETURNING count"
        );
        let row: Option<(i64,)> = sqlx::query_as(&release)
            .bind(key.subject.as_str())
            .bind(key.platform().as_str())
            .bind(key.operation().as_str())
            .bind(key.window.as_str())
            .bind(key.window_start)
            .fetch_optional(&mut *tx)
            .await
            .map_err(self.map_err())?;

        let Some((count,)) = row else {
            // Nothing was charged here; drop the ledger entry with the rest.
            tx.rollback().await.map_err(self.map_err())?;
            return Ok(RefundOutcome::NothingToRefund);
        };
        tx.commit().await.map_err(self.map_err())?;
        Ok(RefundOutcome::Refunded {
            count: count_to_u64(count)?,
        })
    }

    async fn get(&self, key: &CounterKey) -> Result<Option<UsageCounter>, StoreError> {
        let table = self.config.counters_table();
        let query = format!(
            "SELECT subject, platform, operation, window_kind, window_start, window_end, count, updated_at \
             FROM {table} \
             WHERE subject = $1 AND platform = $2 AND operation = $3 \
             AND window_kind = $4 AND window_start = $5"
        );
        let row: Option<CounterRow> = sqlx::query_as(&query)
            .bind(key.subject.as_str())
            .bind(key.platform().as_str())
            .bind(key.operation().as_str())
            .bind(key.window.as_str())
            .bind(key.window_start)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.map_err())?;

        row.map(row_to_counter).transpose()
    }

    async fn counters_for(&self, subject: &Subject) -> Result<Vec<UsageCounter>, StoreError> {
        let table = self.config.counters_table();
        let query = format!(
            "SELECT subject, platform, operation, window_kind, window_start, window_end, count, updated_at \
             FROM {table} WHERE subject = $1 \
             ORDER BY platform, operation, window_kind, window_start"
        );
        let rows: Vec<CounterRow> = sqlx::query_as(&query)
            .bind(subject.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(self.map_err())?;

        rows.into_iter().map(row_to_counter).collect()
    }

    async fn reset(
        &self,
        subject: &Subject,
        platform: Option<&Platform>,
        operation: Option<&Operation>,
    ) -> Result<u64, StoreError> {
        let counters = self.config.counters_table();
        // Refund records stay until cleanup so a late retry is still recognized.
        let query = format!(
            "DELETE FROM {counters} WHERE subject = $1 \
             AND ($2::TEXT IS NULL OR platform = $2) \
             AND ($3::TEXT IS NULL OR operation = $3)"
        );
        let removed = sqlx::query(&query)
            .bind(subject.as_str())
            .bind(platform.map(Platform::as_str))
            .bind(operation.map(Operation::as_str))
            .execute(&self.pool)
            .await
            .map_err(self.map_err())?
            .rows_affected();

        Ok(removed)
    }

    async fn cleanup_expired(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let counters = self.config.counters_table();
        let refunds = self.config.refunds_table();

        let removed = sqlx::query(&format!("DELETE FROM {counters} WHERE window_end <= $1"))
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(self.map_err())?
            .rows_affected();
        sqlx::query(&format!("DELETE FROM {refunds} WHERE window_end <= $1"))
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(self.map_err())?;

        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(self.map_err())?;
        Ok(())
    }
}


#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use std::sync::Arc;

    use turnstile_core::WindowConfig;

    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/turnstile_test".to_string()),
            table_prefix: format!("test_{}_", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = PostgresCounterStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        turnstile_store::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn no_double_grant_across_connections() {
        let store = Arc::new(
            PostgresCounterStore::new(test_config())
                .await
                .expect("pool creation should succeed"),
        );
        let window = WindowConfig::default().short_window(&Utc::now());
        let key = CounterKey::new("pg-threads", Dimension::new("facebook", "post"), &window);

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = key.clone();
                tokio::spawn(async move {
                    // Lock timeouts are retriable; keep trying until decided.
                    loop {
                        match store.check_and_increment(&key, 10).await {
                            Err(e) if e.is_transient() => {}
                            other => return other,
                        }
                    }
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(store.get(&key).await.unwrap().unwrap().count, 10);
    }
}
