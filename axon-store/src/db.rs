//! Pool construction and schema management.

use crate::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Schema, in the portable subset shared with the server dialect.
/// Timestamps are RFC-3339 TEXT (lexicographic order equals time order
/// at a fixed UTC offset); decimals are TEXT; statuses are TEXT checked
/// in the application layer.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS threads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        title TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS thread_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        thread_id INTEGER NOT NULL REFERENCES threads(id),
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_calls TEXT,
        tool_call_id TEXT,
        sent_at TEXT NOT NULL,
        internal INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_thread_messages_thread
        ON thread_messages(thread_id, id)",
    "CREATE TABLE IF NOT EXISTS runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        public_id TEXT NOT NULL UNIQUE,
        owner_id TEXT NOT NULL,
        thread_id INTEGER NOT NULL REFERENCES threads(id),
        status TEXT NOT NULL,
        model TEXT NOT NULL,
        reasoning_effort TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT,
        iterations INTEGER NOT NULL DEFAULT 0,
        prompt_tokens INTEGER NOT NULL DEFAULT 0,
        completion_tokens INTEGER NOT NULL DEFAULT 0,
        cost TEXT NOT NULL DEFAULT '0',
        last_event_id INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS run_events (
        run_id INTEGER NOT NULL REFERENCES runs(id),
        event_id INTEGER NOT NULL,
        run_public_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        payload TEXT NOT NULL,
        PRIMARY KEY (run_id, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS worker_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id INTEGER NOT NULL REFERENCES runs(id),
        task TEXT NOT NULL,
        status TEXT NOT NULL,
        mode TEXT NOT NULL,
        git_repo TEXT,
        branch TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        worker_id TEXT,
        attempt INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT,
        last_heartbeat TEXT,
        result TEXT,
        error TEXT,
        error_kind TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_worker_jobs_claim
        ON worker_jobs(status, priority, created_at)",
    "CREATE TABLE IF NOT EXISTS worker_barriers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id INTEGER NOT NULL REFERENCES runs(id),
        expected_count INTEGER NOT NULL,
        completed_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        deadline TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_worker_barriers_run
        ON worker_barriers(run_id, status)",
    "CREATE TABLE IF NOT EXISTS barrier_jobs (
        barrier_id INTEGER NOT NULL REFERENCES worker_barriers(id),
        job_id INTEGER NOT NULL REFERENCES worker_jobs(id),
        tool_call_id TEXT NOT NULL,
        status TEXT NOT NULL,
        worker_id TEXT,
        result TEXT,
        error TEXT,
        error_kind TEXT,
        completed_at TEXT,
        attempt INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (barrier_id, job_id)
    )",
];

/// Handle to the relational store. Cheap to clone; all clones share the
/// pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the database at `url`, creating the file if needed,
    /// and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// An in-memory store for tests. One connection, since every
    /// `:memory:` connection is its own database.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the schema. Statements are idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!(statements = SCHEMA.len(), "schema applied");
        Ok(())
    }

    /// The underlying pool — the session factory for concurrent callers.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
