use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating required tables if they do not exist.
///
/// This creates the usage counter and refund ledger tables in the configured
/// schema with the configured table prefix. Every statement is idempotent.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let counters_table = config.counters_table();
    let refunds_table = config.refunds_table();

    // One row per (subject, dimension, window). The primary key is what makes
    // first-writer-wins row creation safe under concurrent inserts.
    let create_counters = format!(
        "CREATE TABLE IF NOT EXISTS {counters_table} (
            subject TEXT NOT NULL,
            platform TEXT NOT NULL,
            operation TEXT NOT NULL,
            window_kind TEXT NOT NULL,
            window_start TIMESTAMPTZ NOT NULL,
            window_end TIMESTAMPTZ NOT NULL,
            count BIGINT NOT NULL DEFAULT 0 CHECK (count >= 0),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (subject, platform, operation, window_kind, window_start)
        )"
    );

    let create_counters_idx = format!(
        "CREATE INDEX IF NOT EXISTS {}usage_counters_window_end_idx ON {counters_table} (window_end)",
        config.table_prefix
    );

    let create_refunds = format!(
        "CREATE TABLE IF NOT EXISTS {refunds_table} (
            subject TEXT NOT NULL,
            platform TEXT NOT NULL,
            operation TEXT NOT NULL,
            window_kind TEXT NOT NULL,
            window_start TIMESTAMPTZ NOT NULL,
            idempotency_key TEXT NOT NULL,
            window_end TIMESTAMPTZ NOT NULL,
            refunded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (subject, platform, operation, window_kind, window_start, idempotency_key)
        )"
    );

    let create_refunds_idx = format!(
        "CREATE INDEX IF NOT EXISTS {}refunds_window_end_idx ON {refunds_table} (window_end)",
        config.table_prefix
    );

    sqlx::query(&create_counters).execute(pool).await?;
    sqlx::query(&create_counters_idx).execute(pool).await?;
    sqlx::query(&create_refunds).execute(pool).await?;
    sqlx::query(&create_refunds_idx).execute(pool).await?;

    Ok(())
}
