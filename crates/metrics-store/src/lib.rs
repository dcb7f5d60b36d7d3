//! SQLite persistence for audit samples plus the aggregation engine.
//!
//! The store owns three tables: an append-only `samples` table and two small
//! configuration tables (`hosts`, `pathnames`). Samples are written once per
//! completed audit and never updated or deleted; every derived view is
//! recomputed from raw rows on each call.

pub mod aggregate;
pub mod error;
pub mod samples;
pub mod targets;

pub use error::StoreError;
pub use samples::SampleDraft;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Handle to the metrics database. Cheap to clone; all methods take `&self`.
#[derive(Debug, Clone)]
pub struct MetricStore {
    pool: SqlitePool,
}

impl MetricStore {
    /// Connect to the database at `url` (e.g. `sqlite:pagewatch.db?mode=rwc`)
    /// and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!("Connecting to metrics database: {url}");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// In-memory database, used by tests. A single connection keeps every
    /// query on the same memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT UNIQUE NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pathnames (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pathname TEXT UNIQUE NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                tested_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL,
                pathname TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                is_cached INTEGER NOT NULL,
                browser_backend TEXT NOT NULL,
                performance_score REAL NOT NULL,
                first_contentful_paint REAL NOT NULL,
                largest_contentful_paint REAL NOT NULL,
                total_blocking_time REAL NOT NULL,
                cumulative_layout_shift REAL NOT NULL,
                speed_index REAL NOT NULL,
                interaction_to_next_paint REAL NOT NULL DEFAULT -1,
                report_ref TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_samples_host_pathname ON samples(host, pathname)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
