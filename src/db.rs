//! SQLite store behind the download history.
//!
//! One file holds two tables: `downloads` (the already-downloaded index the
//! planner consults) and `execution_log` (one row per run). Schema lives in
//! `migrations/` and is applied on open.
//!
//! ```no_run
//! use illust_core::Database;
//! use std::path::Path;
//!
//! # async fn open() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("history.db")).await?;
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Pool size for file databases. SQLite serializes writers anyway.
const FILE_POOL_CONNECTIONS: u32 = 4;

/// How long a connection waits on a locked database before giving up.
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Failures opening or migrating the history store.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to create database directory: {0}")]
    Directory(#[source] std::io::Error),
}

/// Pooled handle to the history database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the history file at `db_path`, creating it and any missing
    /// parent directories, and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// [`DbError::Directory`] when the parent cannot be created,
    /// [`DbError::Connection`] or [`DbError::Migration`] otherwise.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(DbError::Directory)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(LOCK_WAIT);
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_CONNECTIONS)
            .connect_with(options)
            .await?;

        Self::migrated(pool).await
    }

    /// Opens a private in-memory store. Single connection, so every query
    /// sees the same database.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] or [`DbError::Migration`].
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("history schema up to date");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reports whether the store runs in write-ahead-log mode.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Closes every pooled connection. Call before exit so WAL contents are
    /// checkpointed.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn insert_download(db: &Database, item_type: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO downloads (item_id, item_type, tag, file_path) VALUES ('1', ?, 'cat', '/out/1_p0.png')",
        )
        .bind(item_type)
        .execute(db.pool())
        .await
        .map(|_| ())
    }

    #[tokio::test]
    async fn test_in_memory_store_has_both_tables() {
        let db = Database::new_in_memory().await.unwrap();

        insert_download(&db, "illustration").await.unwrap();
        sqlx::query(
            "INSERT INTO execution_log (tag, item_type, status) VALUES ('cat', 'novel', 'success')",
        )
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_item_type_rejected() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(insert_download(&db, "manga").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_execution_status_rejected() {
        let db = Database::new_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO execution_log (tag, item_type, status) VALUES ('cat', 'novel', 'partial')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_store_uses_wal_and_creates_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("history.db");

        let db = Database::new(&db_path).await.unwrap();

        assert!(db_path.exists());
        assert!(db.is_wal_enabled().await.unwrap());
        db.close().await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows_and_skips_applied_migrations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("history.db");

        let db = Database::new(&db_path).await.unwrap();
        insert_download(&db, "novel").await.unwrap();
        db.close().await;

        let db = Database::new(&db_path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM downloads")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
