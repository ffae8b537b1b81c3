//! Error types for history operations.

use thiserror::Error;

/// Errors raised by [`DownloadHistory`](super::DownloadHistory).
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Database operation failed.
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored enum column held an unknown value.
    #[error("invalid stored value '{value}' for column {column}")]
    InvalidValue {
        /// Column name.
        column: &'static str,
        /// Offending value.
        value: String,
    },
}

impl HistoryError {
    /// Creates an `InvalidValue` error.
    #[must_use]
    pub fn invalid_value(column: &'static str, value: &str) -> Self {
        Self::InvalidValue {
            column,
            value: value.to_string(),
        }
    }
}
