//! Run orchestration: plan, execute, aggregate.
//!
//! A run moves through `Planning -> Executing(Sequential | Random) ->
//! Aggregated`. Retries live entirely inside the executor and the recovery
//! policy; the pipeline itself never retries.
//!
//! # Limit enforcement
//!
//! Workers stop claiming new items once `downloaded == limit`. Items already
//! claimed re-check the limit before starting their transfer, and a success
//! is only counted while `downloaded < limit`, so the counter never passes
//! the limit. Transfers that finish after the limit is reached are not
//! counted.

mod progress;

pub use progress::{
    LoggingProgressReporter, ProgressEmitter, ProgressReporter, SilentProgressReporter,
};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::download::{
    DefaultRecoveryPolicy, DownloadTask, ErrorKind, ExecutionObserver, ExecutorError,
    RecoveryContext, RecoveryDecision, RecoveryPolicy, TaskError, TaskExecutor,
};
use crate::item::{CandidateItem, ItemType};
use crate::plan::{DownloadPlanner, FilterCriteria, PlanError, SelectionMode};

/// Default number of items downloaded concurrently.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default attempt budget per item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Planning failed.
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    /// The executor aborted the run.
    #[error("execution aborted: {0}")]
    Execution(#[from] ExecutorError),

    /// Candidates were available but nothing was downloaded.
    #[error(
        "failed to download any item (limit {requested}): all {attempted} attempt(s) failed or were skipped ({skipped} skipped)"
    )]
    NothingDownloaded {
        /// Effective download limit.
        requested: usize,
        /// Items in the planned queue.
        attempted: usize,
        /// Items the policy skipped.
        skipped: usize,
    },
}

/// Pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Items downloaded concurrently.
    pub concurrency: usize,
    /// Attempt budget per item. Zero still allows one attempt.
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PipelineConfig {
    /// Returns the executor's attempt cap.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Counters shared by all workers of one run.
#[derive(Debug)]
struct ExecutionState {
    limit: usize,
    downloaded: AtomicUsize,
    skipped: AtomicUsize,
}

impl ExecutionState {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            downloaded: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    fn limit_reached(&self) -> bool {
        self.downloaded.load(Ordering::SeqCst) >= self.limit
    }

    /// Counts one download unless the limit is already reached.
    ///
    /// Returns the new count, or `None` when the success was not counted.
    fn try_count_download(&self) -> Option<usize> {
        self.downloaded
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.limit).then_some(current + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    fn count_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Outcome counters of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineResult {
    /// Items downloaded and counted toward the limit.
    pub downloaded: usize,
    /// Items the recovery policy skipped.
    pub skipped: usize,
    /// Candidates excluded because the history already had them.
    pub already_downloaded: usize,
    /// Candidates removed by bookmark/date filters.
    pub filtered_out: usize,
    /// Candidates handed to the run.
    pub original_count: usize,
    /// Items in the planned queue.
    pub queued: usize,
    /// Effective download limit.
    pub limit: usize,
    /// Selection mode the planner used.
    pub mode: SelectionMode,
}

/// How a finished run is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// At least one item was downloaded.
    Completed,
    /// Fewer than half the limit was downloaded and some items were skipped.
    Partial,
    /// Nothing new: every candidate was already downloaded.
    AllAlreadyDownloaded,
    /// Nothing new: every candidate was filtered out.
    AllFilteredOut,
    /// Discovery returned no candidates.
    NoCandidates,
}

impl RunOutcome {
    /// Returns the stable label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::AllAlreadyDownloaded => "all_already_downloaded",
            Self::AllFilteredOut => "all_filtered_out",
            Self::NoCandidates => "no_candidates",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PipelineResult {
    /// Judges the run.
    ///
    /// Zero downloads is a soft success only when there was nothing new to
    /// get: no candidates, all already downloaded, or all filtered out (with
    /// no skips in either case).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NothingDownloaded`] for any other zero run.
    pub fn assess(&self) -> Result<RunOutcome, PipelineError> {
        if self.downloaded > 0 {
            if self.skipped > 0 && self.downloaded * 2 < self.limit {
                warn!(
                    downloaded = self.downloaded,
                    limit = self.limit,
                    skipped = self.skipped,
                    "partial run: fewer than half of the requested items downloaded"
                );
                return Ok(RunOutcome::Partial);
            }
            return Ok(RunOutcome::Completed);
        }

        if self.original_count == 0 {
            return Ok(RunOutcome::NoCandidates);
        }
        if self.skipped == 0 && self.already_downloaded > 0 {
            return Ok(RunOutcome::AllAlreadyDownloaded);
        }
        if self.skipped == 0 && self.filtered_out > 0 {
            return Ok(RunOutcome::AllFilteredOut);
        }

        Err(PipelineError::NothingDownloaded {
            requested: self.limit,
            attempted: self.queued,
            skipped: self.skipped,
        })
    }
}

/// Plans a run and drives the executor over the planned queue.
pub struct DownloadPipeline {
    planner: DownloadPlanner,
    config: PipelineConfig,
    policy: Arc<dyn RecoveryPolicy>,
    progress: ProgressEmitter,
    interrupt: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for DownloadPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadPipeline")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DownloadPipeline {
    /// Creates a pipeline with the default recovery policy and log-based
    /// progress.
    #[must_use]
    pub fn new(planner: DownloadPlanner, config: PipelineConfig) -> Self {
        let policy = DefaultRecoveryPolicy::with_max_attempts(config.max_attempts());
        Self {
            planner,
            config,
            policy: Arc::new(policy),
            progress: ProgressEmitter::new(Arc::new(LoggingProgressReporter)),
            interrupt: None,
        }
    }

    /// Replaces the recovery policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn RecoveryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the progress reporter.
    #[must_use]
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = ProgressEmitter::new(reporter);
        self
    }

    /// Attaches a shared interrupt flag.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Returns the pipeline settings.
    #[must_use]
    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Plans and executes one run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Plan`] if planning fails and
    /// [`PipelineError::Execution`] if the executor aborts. The zero-download
    /// judgement is left to [`PipelineResult::assess`].
    #[instrument(skip(self, items, criteria, task), fields(candidates = items.len(), %item_type, tag = criteria.tag_or_unknown()))]
    pub async fn run(
        &self,
        items: Vec<CandidateItem>,
        criteria: &FilterCriteria,
        item_type: ItemType,
        task: &dyn DownloadTask,
    ) -> Result<PipelineResult, PipelineError> {
        let plan = self
            .planner
            .plan_downloads(items, criteria, item_type)
            .await?;
        let limit = plan.limit;
        let tag = criteria.tag_or_unknown();

        info!(
            mode = ?plan.mode,
            queued = plan.queue.len(),
            available = plan.available_count,
            filtered_out = plan.filtered_out,
            already_downloaded = plan.already_downloaded,
            limit,
            "download plan ready"
        );
        if let Some(max_attempts) = plan.random_max_attempts {
            debug!(max_attempts, "random selection");
        }

        self.progress.emit(0, limit, Some("starting"));

        let state = ExecutionState::new(limit);
        if !plan.queue.is_empty() {
            let observer = RunObserver {
                state: &state,
                item_type,
                progress: &self.progress,
            };
            let mut executor = TaskExecutor::new(
                self.config.concurrency,
                self.config.max_attempts(),
                Arc::clone(&self.policy),
            );
            if let Some(interrupt) = &self.interrupt {
                executor = executor.with_interrupt(Arc::clone(interrupt));
            }

            executor
                .run(
                    &plan.queue,
                    |item, _index| self.download_one(task, item, tag, &state),
                    &observer,
                )
                .await?;
        }

        let downloaded = state.downloaded.load(Ordering::SeqCst);
        let skipped = state.skipped.load(Ordering::SeqCst);
        self.progress.emit(downloaded, limit, Some("finished"));

        info!(downloaded, skipped, limit, "run finished");
        Ok(PipelineResult {
            downloaded,
            skipped,
            already_downloaded: plan.already_downloaded,
            filtered_out: plan.filtered_out,
            original_count: plan.original_count,
            queued: plan.queue.len(),
            limit,
            mode: plan.mode,
        })
    }

    /// Task wrapper: no-op once the limit is reached, count on success.
    async fn download_one(
        &self,
        task: &dyn DownloadTask,
        item: &CandidateItem,
        tag: &str,
        state: &ExecutionState,
    ) -> Result<(), TaskError> {
        if state.limit_reached() {
            debug!(item_id = item.id, "limit reached, not starting download");
            return Ok(());
        }

        task.download_item(item, tag).await?;

        match state.try_count_download() {
            Some(downloaded) => {
                let message = format!("downloaded {}", item.id);
                self.progress.emit(downloaded, state.limit, Some(&message));
            }
            None => {
                debug!(
                    item_id = item.id,
                    "finished after limit was reached, not counted"
                );
            }
        }
        Ok(())
    }
}

/// Executor hooks for one run.
struct RunObserver<'a> {
    state: &'a ExecutionState,
    item_type: ItemType,
    progress: &'a ProgressEmitter,
}

impl ExecutionObserver<CandidateItem> for RunObserver<'_> {
    fn recovery_context(
        &self,
        item: &CandidateItem,
        _index: usize,
        attempt: u32,
    ) -> RecoveryContext {
        RecoveryContext::new(attempt)
            .with_item_id(item.id)
            .with_item_type(self.item_type)
    }

    fn on_progress(&self, done: usize, total: usize) {
        let downloaded = self.state.downloaded.load(Ordering::SeqCst);
        let message = format!("processed {done}/{total}, downloaded {downloaded}");
        self.progress.emit(
            downloaded.min(self.state.limit),
            self.state.limit,
            Some(&message),
        );
    }

    fn on_decision(
        &self,
        item: &CandidateItem,
        _index: usize,
        attempt: u32,
        error: &TaskError,
        decision: &RecoveryDecision,
    ) {
        let reason = decision.reason().unwrap_or("");
        match decision {
            RecoveryDecision::Skip { .. } => {
                self.state.count_skip();
                if error.kind() == ErrorKind::NotFound {
                    debug!(
                        item_id = item.id,
                        reason,
                        "skipping item that is gone or private"
                    );
                } else {
                    warn!(item_id = item.id, attempt, reason, error = %error, "skipping item");
                }
            }
            RecoveryDecision::Fail { .. } => {
                error!(item_id = item.id, attempt, reason, error = %error, "aborting run");
            }
            RecoveryDecision::Retry { delay, .. } | RecoveryDecision::Backoff { delay, .. } => {
                debug!(
                    item_id = item.id,
                    attempt,
                    action = decision.action(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying item"
                );
            }
        }
    }

    fn should_dispatch(&self) -> bool {
        !self.state.limit_reached()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn result(downloaded: usize, skipped: usize) -> PipelineResult {
        PipelineResult {
            downloaded,
            skipped,
            already_downloaded: 0,
            filtered_out: 0,
            original_count: 10,
            queued: 10,
            limit: 10,
            mode: SelectionMode::Sequential,
        }
    }

    // ==================== ExecutionState Tests ====================

    #[test]
    fn test_count_download_stops_at_limit() {
        let state = ExecutionState::new(2);
        assert_eq!(state.try_count_download(), Some(1));
        assert_eq!(state.try_count_download(), Some(2));
        assert_eq!(state.try_count_download(), None);
        assert!(state.limit_reached());
        assert_eq!(state.downloaded.load(Ordering::SeqCst), 2);
    }

    // ==================== Assessment Tests ====================

    #[test]
    fn test_assess_full_run_completed() {
        assert_eq!(result(10, 0).assess().unwrap(), RunOutcome::Completed);
        assert_eq!(result(6, 4).assess().unwrap(), RunOutcome::Completed);
    }

    #[test]
    fn test_assess_low_yield_with_skips_is_partial() {
        assert_eq!(result(2, 8).assess().unwrap(), RunOutcome::Partial);
        assert_eq!(result(2, 0).assess().unwrap(), RunOutcome::Completed);
    }

    #[test]
    fn test_assess_no_candidates_is_soft_success() {
        let r = PipelineResult {
            original_count: 0,
            queued: 0,
            ..result(0, 0)
        };
        assert_eq!(r.assess().unwrap(), RunOutcome::NoCandidates);
    }

    #[test]
    fn test_assess_everything_already_downloaded() {
        let r = PipelineResult {
            already_downloaded: 10,
            queued: 0,
            ..result(0, 0)
        };
        assert_eq!(r.assess().unwrap(), RunOutcome::AllAlreadyDownloaded);
    }

    #[test]
    fn test_assess_everything_filtered_out() {
        let r = PipelineResult {
            filtered_out: 10,
            queued: 0,
            ..result(0, 0)
        };
        assert_eq!(r.assess().unwrap(), RunOutcome::AllFilteredOut);
    }

    #[test]
    fn test_assess_all_skipped_is_failure() {
        let r = PipelineResult {
            already_downloaded: 3,
            ..result(0, 7)
        };
        match r.assess() {
            Err(PipelineError::NothingDownloaded {
                requested,
                attempted,
                skipped,
            }) => {
                assert_eq!(requested, 10);
                assert_eq!(attempted, 10);
                assert_eq!(skipped, 7);
            }
            other => panic!("Expected NothingDownloaded, got: {other:?}"),
        }
    }

    #[test]
    fn test_assess_zero_with_no_skips_and_candidates_is_failure() {
        assert!(result(0, 0).assess().is_err());
    }

    #[test]
    fn test_pipeline_config_zero_retries_still_attempts_once() {
        let config = PipelineConfig {
            max_retries: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(PipelineConfig::default().concurrency, 3);
    }
}
