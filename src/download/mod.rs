//! Per-item task execution: error taxonomy, recovery, scheduling, fetching.
//!
//! # Overview
//!
//! - [`TaskError`] - closed failure taxonomy every task reports in
//! - [`RecoveryPolicy`] - decides skip / retry / backoff / fail per failure
//! - [`TaskExecutor`] - bounded worker pool with per-item recovery
//! - [`AdaptiveLimiter`] - paced, rate-limit-aware batch processing
//! - [`HttpClient`] and [`ItemDownloader`] - the default page download task
//!
//! # Example
//!
//! ```no_run
//! use illust_core::download::{HttpClient, ItemDownloader};
//! use illust_core::{CandidateItem, ItemType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = ItemDownloader::new(HttpClient::new(), "./downloads", ItemType::Illustration);
//! let item = CandidateItem::new(1, 0).with_pages(vec!["https://i.example/1_p0.png".into()]);
//! let saved = downloader.download(&item, "landscape").await?;
//! println!("saved {} file(s)", saved.files.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod executor;
mod item_task;
mod limiter;
mod recovery;

pub use client::{FetchedResource, HttpClient, classify_status, parse_retry_after};
pub use constants::MAX_RETRY_AFTER;
pub use error::{ErrorKind, TaskError, TransientSignal};
pub use executor::{ExecutionObserver, ExecutionReport, ExecutorError, NoopObserver, TaskExecutor};
pub use item_task::{DEFAULT_PAGE_CONCURRENCY, DownloadTask, DownloadedItem, ItemDownloader};
pub use limiter::{AdaptiveLimiter, LimiterConfig, ProcessResult, process_in_parallel};
pub use recovery::{
    DEFAULT_MAX_ATTEMPTS, DefaultRecoveryPolicy, RecoveryContext, RecoveryDecision, RecoveryPolicy,
};
