/// SQLite connection management
///
/// One database holds the webhook tokens, the run queue and the recurring
/// schedules. Tables are created on connect; safe to call repeatedly.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{path::Path, str::FromStr};

/// Open (creating if missing) the database at `url` and initialize the schema
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| anyhow::anyhow!("Invalid database url '{}': {}", url, e))?
        .create_if_missing(true);

    if let Some(parent) = Path::new(options.get_filename()).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e))?;
        }
    }

    tracing::info!("🗄️ Opening database: {}", options.get_filename().display());
    let pool = SqlitePool::connect_with(options).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database, used by tests and throwaway runs
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes
async fn init_schema(pool: &SqlitePool) -> Result<()> {
    // Webhook tokens (immutable after insert)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhooks (
            token TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            nodes JSON NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Queued, running and finished pipeline runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            nodes JSON NOT NULL,
            payload JSON NOT NULL,
            trigger_meta JSON NOT NULL,
            trigger_id TEXT NOT NULL,
            status TEXT NOT NULL,
            run_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            lease_until INTEGER,
            worker_id TEXT,
            results JSON,
            error TEXT,
            created_at INTEGER NOT NULL,
            finished_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Recurring triggers and their next persisted fire time
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL,
            next_fire_at INTEGER NOT NULL,
            fire_count INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, run_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_trigger ON jobs(trigger_id, run_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_webhooks_flow ON webhooks(flow_id)")
        .execute(pool)
        .await?;

    Ok(())
}
