//! Row types for the download index and execution log.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::error::HistoryError;
use crate::item::ItemType;

/// Outcome of one run as stored in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The run met its expectations (including soft-success zero runs).
    Success,
    /// The run aborted or downloaded nothing when it should have.
    Failed,
}

impl ExecutionStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid execution status: {s}")),
        }
    }
}

/// A file to add to the download index.
#[derive(Debug, Clone, Copy)]
pub struct NewDownload<'a> {
    /// Remote item id.
    pub item_id: u64,
    /// Kind of item.
    pub item_type: ItemType,
    /// Run label.
    pub tag: &'a str,
    /// Item title, when known.
    pub title: Option<&'a str>,
    /// Where the file was written.
    pub file_path: &'a Path,
}

/// A row of the download index.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Row id.
    pub id: i64,
    /// Remote item id (stored as text).
    pub item_id: String,
    /// Item type (stored as text, parsed via `item_type()`).
    #[sqlx(rename = "item_type")]
    pub item_type_str: String,
    /// Run label.
    pub tag: String,
    /// Item title.
    pub title: Option<String>,
    /// Saved file path.
    pub file_path: String,
    /// UTC timestamp, `YYYY-MM-DD HH:MM:SS`.
    pub downloaded_at: String,
}

impl DownloadRecord {
    /// Parses the stored item type.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidValue`] for unknown values.
    pub fn item_type(&self) -> Result<ItemType, HistoryError> {
        self.item_type_str
            .parse()
            .map_err(|_| HistoryError::invalid_value("item_type", &self.item_type_str))
    }
}

/// A row of the execution log.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionEntry {
    /// Row id.
    pub id: i64,
    /// Run label.
    pub tag: String,
    /// Item type (stored as text).
    pub item_type: String,
    /// Outcome (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Free-form detail.
    pub message: Option<String>,
    /// UTC timestamp, `YYYY-MM-DD HH:MM:SS`.
    pub executed_at: String,
}

impl ExecutionEntry {
    /// Parses the stored status.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidValue`] for unknown values.
    pub fn status(&self) -> Result<ExecutionStatus, HistoryError> {
        self.status_str
            .parse()
            .map_err(|_| HistoryError::invalid_value("status", &self.status_str))
    }
}
