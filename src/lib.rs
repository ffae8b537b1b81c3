//! Illustration/novel downloader core library.
//!
//! Turns a list of discovery results (search or ranking candidates) into
//! downloaded files: filter, deduplicate against the download history,
//! select, then download with bounded concurrency and policy-driven recovery.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`item`] - Candidate items as returned by discovery
//! - [`plan`] - Filtering, deduplication and queue selection
//! - [`download`] - Recovery policy, task executor, adaptive limiter, HTTP
//! - [`pipeline`] - Run orchestration and outcome assessment
//! - [`history`] - Already-downloaded index and execution log
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod download;
pub mod history;
pub mod item;
pub mod pipeline;
pub mod plan;
mod user_agent;

// Re-export commonly used types
pub use db::{Database, DbError};
pub use download::{
    AdaptiveLimiter, DefaultRecoveryPolicy, DownloadTask, ErrorKind, HttpClient, ItemDownloader,
    LimiterConfig, RecoveryDecision, RecoveryPolicy, TaskError, TaskExecutor, TransientSignal,
};
pub use history::{DownloadHistory, ExecutionStatus, HistoryError};
pub use item::{CandidateItem, ItemType, PopularityMetrics};
pub use pipeline::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadPipeline, PipelineConfig, PipelineError,
    PipelineResult, RunOutcome,
};
pub use plan::{DownloadPlanner, FilterCriteria, PlannedDownload, SelectionMode};
