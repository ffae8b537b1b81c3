//! Download history: the already-downloaded index and the execution log.
//!
//! # Overview
//!
//! - [`DownloadHistory`] - `SQLite`-backed store, implements
//!   [`AlreadyDownloadedLookup`] for the planner
//! - [`DownloadRecord`] - one saved file
//! - [`ExecutionEntry`] - one run outcome
//!
//! # Example
//!
//! ```no_run
//! use illust_core::history::{DownloadHistory, ExecutionStatus};
//! use illust_core::{Database, ItemType};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("history.db")).await?;
//! let history = DownloadHistory::new(db);
//! let status = ExecutionStatus::Success;
//! history
//!     .log_execution("landscape", ItemType::Illustration, status, Some("5 downloaded"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod record;

pub use error::HistoryError;
pub use record::{DownloadRecord, ExecutionEntry, ExecutionStatus, NewDownload};

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::item::ItemType;
use crate::plan::{AlreadyDownloadedLookup, PlanError};

/// Maximum ids bound per `IN (...)` query.
///
/// Keeps each statement under `SQLite`'s bound-parameter limit.
pub const ID_LOOKUP_CHUNK: usize = 500;

const DOWNLOADED_IDS_PREFIX: &str = "SELECT DISTINCT item_id FROM downloads WHERE item_type = ";

/// Persistent record of saved files and run outcomes.
#[derive(Debug, Clone)]
pub struct DownloadHistory {
    db: Database,
}

impl DownloadHistory {
    /// Creates a history backed by the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the subset of `ids` with at least one saved file.
    ///
    /// Ids are queried in chunks of [`ID_LOOKUP_CHUNK`].
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if a query fails.
    #[instrument(skip(self, ids), fields(ids = ids.len(), %item_type))]
    pub async fn get_downloaded_ids(
        &self,
        ids: &[String],
        item_type: ItemType,
    ) -> Result<HashSet<String>, HistoryError> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(DOWNLOADED_IDS_PREFIX);
            builder.push_bind(item_type.as_str());
            builder.push(" AND item_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder
                .build_query_as()
                .fetch_all(self.db.pool())
                .await?;
            found.extend(rows.into_iter().map(|(id,)| id));
        }
        debug!(found = found.len(), "already-downloaded lookup finished");
        Ok(found)
    }

    /// Adds a saved file to the index.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the insert fails.
    #[instrument(skip(self, download), fields(item_id = download.item_id))]
    pub async fn record_download(&self, download: &NewDownload<'_>) -> Result<i64, HistoryError> {
        let result = sqlx::query(
            r"INSERT INTO downloads (item_id, item_type, tag, title, file_path)
              VALUES (?, ?, ?, ?, ?)",
        )
        .bind(download.item_id.to_string())
        .bind(download.item_type.as_str())
        .bind(download.tag)
        .bind(download.title)
        .bind(download.file_path.to_string_lossy().into_owned())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Returns every saved file for one item, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn downloads_for_item(
        &self,
        item_id: u64,
        item_type: ItemType,
    ) -> Result<Vec<DownloadRecord>, HistoryError> {
        let records = sqlx::query_as::<_, DownloadRecord>(
            r"SELECT * FROM downloads
              WHERE item_id = ? AND item_type = ?
              ORDER BY id ASC",
        )
        .bind(item_id.to_string())
        .bind(item_type.as_str())
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }

    /// Appends a run outcome to the execution log.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the insert fails.
    #[instrument(skip(self, message))]
    pub async fn log_execution(
        &self,
        tag: &str,
        item_type: ItemType,
        status: ExecutionStatus,
        message: Option<&str>,
    ) -> Result<i64, HistoryError> {
        let result = sqlx::query(
            r"INSERT INTO execution_log (tag, item_type, status, message)
              VALUES (?, ?, ?, ?)",
        )
        .bind(tag)
        .bind(item_type.as_str())
        .bind(status.as_str())
        .bind(message)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Returns the most recent run outcomes, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn recent_executions(&self, limit: u32) -> Result<Vec<ExecutionEntry>, HistoryError> {
        let entries = sqlx::query_as::<_, ExecutionEntry>(
            r"SELECT * FROM execution_log
              ORDER BY id DESC
              LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl AlreadyDownloadedLookup for DownloadHistory {
    async fn downloaded_ids(
        &self,
        ids: &[String],
        item_type: ItemType,
    ) -> Result<HashSet<String>, PlanError> {
        self.get_downloaded_ids(ids, item_type)
            .await
            .map_err(|e| PlanError::Lookup(Box::new(e)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    async fn history() -> DownloadHistory {
        DownloadHistory::new(Database::new_in_memory().await.unwrap())
    }

    fn download(item_id: u64, item_type: ItemType, path: &Path) -> NewDownload<'_> {
        NewDownload {
            item_id,
            item_type,
            tag: "cat",
            title: Some("title"),
            file_path: path,
        }
    }

    #[tokio::test]
    async fn test_downloaded_ids_filters_by_type() {
        let history = history().await;
        let path = Path::new("/tmp/1_p0.png");
        history
            .record_download(&download(1, ItemType::Illustration, path))
            .await
            .unwrap();
        history
            .record_download(&download(2, ItemType::Novel, path))
            .await
            .unwrap();

        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let found = history
            .get_downloaded_ids(&ids, ItemType::Illustration)
            .await
            .unwrap();
        assert_eq!(found, HashSet::from(["1".to_string()]));
    }

    #[tokio::test]
    async fn test_downloaded_ids_spans_multiple_chunks() {
        let history = history().await;
        let path = Path::new("/tmp/x.png");
        for id in [5, 700, 1201] {
            history
                .record_download(&download(id, ItemType::Illustration, path))
                .await
                .unwrap();
        }

        let ids: Vec<String> = (0..1300).map(|i: u32| i.to_string()).collect();
        let found = history
            .get_downloaded_ids(&ids, ItemType::Illustration)
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.contains("1201"));
    }

    #[tokio::test]
    async fn test_multi_page_item_reported_once() {
        let history = history().await;
        let first = download(9, ItemType::Illustration, Path::new("/tmp/9_p0.png"));
        let second = download(9, ItemType::Illustration, Path::new("/tmp/9_p1.png"));
        history.record_download(&first).await.unwrap();
        history.record_download(&second).await.unwrap();

        let found = history
            .get_downloaded_ids(&["9".to_string()], ItemType::Illustration)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let records = history
            .downloads_for_item(9, ItemType::Illustration)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].item_type().unwrap(), ItemType::Illustration);
        assert!(records[1].file_path.ends_with("9_p1.png"));
    }

    #[tokio::test]
    async fn test_execution_log_newest_first() {
        let history = history().await;
        history
            .log_execution("a", ItemType::Novel, ExecutionStatus::Success, None)
            .await
            .unwrap();
        history
            .log_execution("b", ItemType::Novel, ExecutionStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let entries = history.recent_executions(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tag, "b");
        assert_eq!(entries[0].status().unwrap(), ExecutionStatus::Failed);
        assert_eq!(entries[0].message.as_deref(), Some("boom"));

        let limited = history.recent_executions(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_trait_delegates() {
        let history = history().await;
        history
            .record_download(&download(4, ItemType::Novel, Path::new("/tmp/4.txt")))
            .await
            .unwrap();
        let lookup: &dyn AlreadyDownloadedLookup = &history;
        let found = lookup
            .downloaded_ids(&["4".to_string()], ItemType::Novel)
            .await
            .unwrap();
        assert!(found.contains("4"));
    }
}
