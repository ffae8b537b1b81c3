//! Concurrent task executor with per-item recovery.
//!
//! [`TaskExecutor`] runs one task per item over a bounded pool of logical
//! workers. The workers are futures polled together on the caller's task;
//! they are not spawned, so nothing runs once [`TaskExecutor::run`] returns
//! or is dropped.
//!
//! # Overview
//!
//! Every worker loops over a shared cursor:
//! 1. Claim the next unclaimed index
//! 2. Run the task for that item
//! 3. On failure, ask the [`RecoveryPolicy`] and apply its decision
//!    (skip, fail, or retry/backoff on the same item)
//!
//! A `fail` decision, attempt exhaustion or an interrupt drops every other
//! worker and returns [`ExecutorError`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use illust_core::download::{DefaultRecoveryPolicy, NoopObserver, TaskError, TaskExecutor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = TaskExecutor::new(3, 3, Arc::new(DefaultRecoveryPolicy::default()));
//! let items = vec![1u64, 2, 3];
//! let report = executor
//!     .run(&items, |id, _index| {
//!         let id = *id;
//!         async move { Ok::<_, TaskError>(id * 10) }
//!     }, &NoopObserver)
//!     .await?;
//! assert_eq!(report.results, vec![Some(10), Some(20), Some(30)]);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::future::try_join_all;
use thiserror::Error;
use tracing::{debug, instrument};

use super::error::TaskError;
use super::recovery::{RecoveryContext, RecoveryDecision, RecoveryPolicy};

/// Error type for executor runs.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// An item could not be recovered and the run was aborted.
    #[error(
        "item {index} aborted after {attempts} attempt(s): {}",
        .reason.as_deref().unwrap_or("unrecoverable error")
    )]
    Aborted {
        /// Position of the failing item in the input.
        index: usize,
        /// Attempts made on that item.
        attempts: u32,
        /// Reason given by the policy, if any.
        reason: Option<String>,
        /// Last task error.
        #[source]
        source: TaskError,
    },

    /// The interrupt flag was raised.
    #[error("run interrupted")]
    Interrupted,
}

/// Hooks invoked by the executor while a run progresses.
///
/// All methods have no-op defaults. Hooks are for observation; the only
/// one that affects scheduling is [`should_dispatch`](Self::should_dispatch).
pub trait ExecutionObserver<T>: Send + Sync {
    /// Builds the context handed to the recovery policy.
    fn recovery_context(&self, _item: &T, _index: usize, attempt: u32) -> RecoveryContext {
        RecoveryContext::new(attempt)
    }

    /// Called after each item's terminal outcome (success or skip).
    ///
    /// `done` increases by one per call.
    fn on_progress(&self, _done: usize, _total: usize) {}

    /// Called for every recovery decision, retries included.
    fn on_decision(
        &self,
        _item: &T,
        _index: usize,
        _attempt: u32,
        _error: &TaskError,
        _decision: &RecoveryDecision,
    ) {
    }

    /// Checked before a worker claims the next index.
    ///
    /// Returning `false` stops all workers from claiming more work. Items
    /// already claimed still run to completion.
    fn should_dispatch(&self) -> bool {
        true
    }
}

/// Observer that ignores every hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<T> ExecutionObserver<T> for NoopObserver {}

/// Per-run counters, updated by concurrent workers.
#[derive(Debug, Default)]
struct RunStats {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
}

/// Output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport<R> {
    /// `results[i]` belongs to `items[i]`. `None` means skipped or never
    /// dispatched.
    pub results: Vec<Option<R>>,
    /// Items that succeeded.
    pub completed: usize,
    /// Items the policy skipped.
    pub skipped: usize,
    /// Retry and backoff decisions applied.
    pub retried: usize,
}

/// Runs tasks over items with bounded concurrency and per-item recovery.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    concurrency: usize,
    max_attempts: u32,
    policy: Arc<dyn RecoveryPolicy>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl TaskExecutor {
    /// Creates an executor.
    ///
    /// `concurrency` and `max_attempts` are raised to at least 1.
    #[must_use]
    pub fn new(concurrency: usize, max_attempts: u32, policy: Arc<dyn RecoveryPolicy>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_attempts: max_attempts.max(1),
            policy,
            interrupt: None,
        }
    }

    /// Attaches a shared interrupt flag checked before each dispatch and
    /// after each retry delay.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Returns the configured concurrency.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the default attempt cap.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `task` for every item.
    ///
    /// Results are positionally aligned with `items` regardless of
    /// completion order.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Aborted`] when the policy decides `fail` or an
    /// item exceeds its attempt cap, and [`ExecutorError::Interrupted`] when
    /// the interrupt flag is raised. In-flight work is dropped in both cases.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.concurrency))]
    pub async fn run<'a, T, R, F, Fut>(
        &self,
        items: &'a [T],
        task: F,
        observer: &dyn ExecutionObserver<T>,
    ) -> Result<ExecutionReport<R>, ExecutorError>
    where
        F: Fn(&'a T, usize) -> Fut,
        Fut: Future<Output = Result<R, TaskError>>,
    {
        let total = items.len();
        let worker_count = self.concurrency.min(total).max(1);
        let cursor = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let stats = RunStats::default();

        debug!(worker_count, total, "starting workers");

        let workers = (0..worker_count).map(|_| Worker {
            executor: self,
            items,
            task: &task,
            observer,
            cursor: &cursor,
            done: &done,
            stats: &stats,
        });
        let outputs = try_join_all(workers.map(|worker| worker.run())).await?;

        let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        for (index, value) in outputs.into_iter().flatten() {
            if let Some(slot) = results.get_mut(index) {
                *slot = Some(value);
            }
        }

        Ok(ExecutionReport {
            results,
            completed: stats.completed.load(Ordering::SeqCst),
            skipped: stats.skipped.load(Ordering::SeqCst),
            retried: stats.retried.load(Ordering::SeqCst),
        })
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// One logical worker; borrows everything from the enclosing run.
struct Worker<'a, 's, T, F> {
    executor: &'s TaskExecutor,
    items: &'a [T],
    task: &'s F,
    observer: &'s dyn ExecutionObserver<T>,
    cursor: &'s AtomicUsize,
    done: &'s AtomicUsize,
    stats: &'s RunStats,
}

impl<'a, T, F> Worker<'a, '_, T, F> {
    async fn run<R, Fut>(self) -> Result<Vec<(usize, R)>, ExecutorError>
    where
        F: Fn(&'a T, usize) -> Fut,
        Fut: Future<Output = Result<R, TaskError>>,
    {
        let mut output = Vec::new();
        loop {
            if self.executor.is_interrupted() {
                return Err(ExecutorError::Interrupted);
            }
            if !self.observer.should_dispatch() {
                break;
            }
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(item) = self.items.get(index) else {
                break;
            };
            if let Some(value) = self.run_item(item, index).await? {
                output.push((index, value));
            }
        }
        Ok(output)
    }

    /// Runs one item until success, skip or abort.
    async fn run_item<R, Fut>(&self, item: &'a T, index: usize) -> Result<Option<R>, ExecutorError>
    where
        F: Fn(&'a T, usize) -> Fut,
        Fut: Future<Output = Result<R, TaskError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let error = match (self.task)(item, index).await {
                Ok(value) => {
                    self.stats.completed.fetch_add(1, Ordering::SeqCst);
                    self.report_done();
                    return Ok(Some(value));
                }
                Err(error) => error,
            };

            let context = self.observer.recovery_context(item, index, attempt);
            let decision = self.executor.policy.decide(&error, &context);
            self.observer
                .on_decision(item, index, attempt, &error, &decision);

            match decision {
                RecoveryDecision::Skip { .. } => {
                    self.stats.skipped.fetch_add(1, Ordering::SeqCst);
                    self.report_done();
                    return Ok(None);
                }
                RecoveryDecision::Fail { reason } => {
                    return Err(ExecutorError::Aborted {
                        index,
                        attempts: attempt,
                        reason,
                        source: error,
                    });
                }
                RecoveryDecision::Retry {
                    delay,
                    max_attempts,
                    ..
                }
                | RecoveryDecision::Backoff {
                    delay,
                    max_attempts,
                    ..
                } => {
                    self.stats.retried.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    if self.executor.is_interrupted() {
                        return Err(ExecutorError::Interrupted);
                    }
                    let cap = max_attempts.unwrap_or(self.executor.max_attempts);
                    if attempt >= cap {
                        return Err(ExecutorError::Aborted {
                            index,
                            attempts: attempt,
                            reason: Some("attempt cap exceeded".to_string()),
                            source: error,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn report_done(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.observer.on_progress(done, self.items.len());
    }
}
