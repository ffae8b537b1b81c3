//! Integration tests for the task executor, the adaptive limiter and the
//! download pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use illust_core::download::{
    AdaptiveLimiter, DefaultRecoveryPolicy, DownloadTask, ExecutionObserver, ExecutorError,
    LimiterConfig, NoopObserver, RecoveryDecision, RecoveryPolicy, TaskError, TaskExecutor,
    TransientSignal, process_in_parallel,
};
use illust_core::pipeline::{
    DownloadPipeline, PipelineConfig, PipelineError, ProgressReporter, RunOutcome,
    SilentProgressReporter,
};
use illust_core::plan::{AlreadyDownloadedLookup, DownloadPlanner, FilterCriteria, PlanError};
use illust_core::{CandidateItem, ItemType, SelectionMode};

fn fast_policy(max_attempts: u32) -> Arc<dyn RecoveryPolicy> {
    Arc::new(DefaultRecoveryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
    ))
}

#[derive(Default)]
struct DecisionLog {
    decisions: Mutex<Vec<(usize, u32, &'static str)>>,
}

impl<T> ExecutionObserver<T> for DecisionLog {
    fn on_decision(
        &self,
        _item: &T,
        index: usize,
        attempt: u32,
        _error: &TaskError,
        decision: &RecoveryDecision,
    ) {
        self.decisions
            .lock()
            .unwrap()
            .push((index, attempt, decision.action()));
    }
}

// ==================== Executor Tests ====================

#[tokio::test]
async fn test_executor_retries_transient_failure_then_succeeds() {
    let executor = TaskExecutor::new(2, 3, fast_policy(3));
    let items: Vec<u32> = (0..5).collect();
    let calls: Mutex<HashMap<u32, u32>> = Mutex::new(HashMap::new());
    let log = DecisionLog::default();

    let report = executor
        .run(
            &items,
            |item, _index| {
                let call = {
                    let mut calls = calls.lock().unwrap();
                    let entry = calls.entry(*item).or_insert(0);
                    *entry += 1;
                    *entry
                };
                let item = *item;
                async move {
                    if item == 2 && call == 1 {
                        Err(TaskError::transient(TransientSignal::Other, "503"))
                    } else {
                        Ok(item * 100)
                    }
                }
            },
            &log,
        )
        .await
        .unwrap();

    assert_eq!(
        report.results,
        vec![Some(0), Some(100), Some(200), Some(300), Some(400)]
    );
    assert_eq!(report.completed, 5);
    assert_eq!(report.retried, 1);
    assert_eq!(*log.decisions.lock().unwrap(), vec![(2, 1, "retry")]);
    assert_eq!(calls.lock().unwrap()[&2], 2);
}

#[tokio::test]
async fn test_executor_skipped_items_leave_empty_slots() {
    let executor = TaskExecutor::new(3, 3, fast_policy(3));
    let items: Vec<u32> = (0..6).collect();

    let report = executor
        .run(
            &items,
            |item, _index| {
                let item = *item;
                async move {
                    if item % 2 == 0 {
                        Err(TaskError::not_found(format!("{item} is private")))
                    } else {
                        Ok(item)
                    }
                }
            },
            &NoopObserver,
        )
        .await
        .unwrap();

    assert_eq!(
        report.results,
        vec![None, Some(1), None, Some(3), None, Some(5)]
    );
    assert_eq!(report.skipped, 3);
    assert_eq!(report.completed, 3);
}

#[tokio::test]
async fn test_executor_exhaustion_aborts_with_last_error() {
    let executor = TaskExecutor::new(1, 3, fast_policy(3));
    let items = vec!["only"];
    let calls = AtomicUsize::new(0);

    let err = executor
        .run(
            &items,
            |_item, _index| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TaskError::transient(TransientSignal::Other, "502")) }
            },
            &NoopObserver,
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        ExecutorError::Aborted {
            index, attempts, ..
        } => {
            assert_eq!(index, 0);
            assert_eq!(attempts, 3);
        }
        ExecutorError::Interrupted => panic!("expected abort"),
    }
}

#[tokio::test]
async fn test_executor_rate_limit_backs_off_then_retries() {
    let executor = TaskExecutor::new(2, 3, fast_policy(3));
    let items: Vec<u32> = vec![1, 2];
    let calls = AtomicUsize::new(0);
    let log = DecisionLog::default();

    let report = executor
        .run(
            &items,
            |item, _index| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                let item = *item;
                async move {
                    if item == 1 && call == 0 {
                        Err(TaskError::rate_limited(
                            "429 Too Many Requests",
                            Some(Duration::from_millis(10)),
                        ))
                    } else {
                        Ok(item)
                    }
                }
            },
            &log,
        )
        .await
        .unwrap();

    assert_eq!(report.results, vec![Some(1), Some(2)]);
    assert_eq!(report.retried, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(*log.decisions.lock().unwrap(), vec![(0, 1, "backoff")]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_executor_concurrency_never_exceeds_bound() {
    let executor = TaskExecutor::new(3, 3, fast_policy(3));
    let items: Vec<u64> = (0..15).collect();
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let (active, peak) = (&active, &peak);

    let report = executor
        .run(
            &items,
            move |item, _index| {
                let item = *item;
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(3 + item % 4)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(item)
                }
            },
            &NoopObserver,
        )
        .await
        .unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(report.completed, 15);
}

// ==================== Limiter Tests ====================

#[tokio::test]
async fn test_limiter_never_drops_below_floor() {
    let config = LimiterConfig {
        request_delay: Duration::ZERO,
        dynamic_concurrency: true,
        min_concurrency: 2,
    };
    let limiter = AdaptiveLimiter::new(8, config);
    let items: Vec<u32> = (0..24).collect();

    let results = limiter
        .process(items, |item, _index| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Err::<u32, _>(TaskError::rate_limited(format!("{item}: 429"), None))
        })
        .await;

    assert_eq!(results.len(), 24);
    let all_rate_limited = results
        .iter()
        .all(|r| r.as_ref().is_err_and(TaskError::is_rate_limit));
    assert!(all_rate_limited);
    assert_eq!(limiter.lowest_concurrency(), 2);
    assert!(limiter.live_concurrency() >= 2);
}

#[tokio::test]
async fn test_process_in_parallel_keeps_input_order() {
    let config = LimiterConfig {
        request_delay: Duration::ZERO,
        ..LimiterConfig::default()
    };
    let items: Vec<u64> = (0..10).collect();

    let results = process_in_parallel(
        items,
        |item, index| async move {
            tokio::time::sleep(Duration::from_millis(10 - item)).await;
            Ok::<_, TaskError>((item, index))
        },
        4,
        config,
    )
    .await;

    let values: Vec<(u64, usize)> = results.into_iter().map(Result::unwrap).collect();
    let expected: Vec<(u64, usize)> = (0..10u64).zip(0..10usize).collect();
    assert_eq!(values, expected);
}

// ==================== Pipeline Tests ====================

#[derive(Default)]
struct NothingDownloaded;

#[async_trait]
impl AlreadyDownloadedLookup for NothingDownloaded {
    async fn downloaded_ids(
        &self,
        _ids: &[String],
        _item_type: ItemType,
    ) -> Result<HashSet<String>, PlanError> {
        Ok(HashSet::new())
    }
}

/// Task that succeeds unless the id is listed, counting every call.
#[derive(Default)]
struct ScriptedTask {
    calls: AtomicUsize,
    not_found: HashSet<u64>,
    fatal: HashSet<u64>,
}

#[async_trait]
impl DownloadTask for ScriptedTask {
    async fn download_item(&self, item: &CandidateItem, _tag: &str) -> Result<(), TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        if self.not_found.contains(&item.id) {
            return Err(TaskError::not_found(format!("{} deleted", item.id)));
        }
        if self.fatal.contains(&item.id) {
            return Err(TaskError::fatal(format!("{} unauthorized", item.id)));
        }
        Ok(())
    }
}

fn pipeline(concurrency: usize) -> DownloadPipeline {
    let planner = DownloadPlanner::new(Arc::new(NothingDownloaded));
    DownloadPipeline::new(
        planner,
        PipelineConfig {
            concurrency,
            max_retries: 3,
        },
    )
    .with_policy(fast_policy(3))
    .with_progress(Arc::new(SilentProgressReporter))
}

fn candidates(count: u64) -> Vec<CandidateItem> {
    (1..=count).map(|id| CandidateItem::new(id, 100)).collect()
}

#[tokio::test]
async fn test_pipeline_random_mode_stops_at_limit() {
    let task = ScriptedTask::default();
    let criteria = FilterCriteria {
        limit: 5,
        random_selection: true,
        tag: Some("daily".to_string()),
        ..FilterCriteria::default()
    };

    let result = pipeline(3)
        .run(candidates(60), &criteria, ItemType::Illustration, &task)
        .await
        .unwrap();

    assert_eq!(result.mode, SelectionMode::Random);
    assert_eq!(result.queued, 50);
    assert_eq!(result.downloaded, 5);
    assert!(task.calls.load(Ordering::SeqCst) <= 5 + 2);
    assert_eq!(result.assess().unwrap(), RunOutcome::Completed);
}

#[tokio::test]
async fn test_pipeline_random_mode_walks_past_missing_items() {
    let task = ScriptedTask {
        not_found: (1..=42).collect(),
        ..ScriptedTask::default()
    };
    let criteria = FilterCriteria {
        limit: 3,
        random_selection: true,
        ..FilterCriteria::default()
    };

    let result = pipeline(2)
        .run(candidates(45), &criteria, ItemType::Illustration, &task)
        .await
        .unwrap();

    assert_eq!(result.queued, 45);
    assert_eq!(result.downloaded, 3);
    assert_eq!(
        task.calls.load(Ordering::SeqCst),
        result.downloaded + result.skipped
    );
}

#[tokio::test]
async fn test_pipeline_skipped_items_do_not_count_and_low_yield_is_partial() {
    let task = ScriptedTask {
        not_found: HashSet::from([2, 4]),
        ..ScriptedTask::default()
    };
    let criteria = FilterCriteria {
        limit: 10,
        ..FilterCriteria::default()
    };

    let result = pipeline(1)
        .run(candidates(6), &criteria, ItemType::Novel, &task)
        .await
        .unwrap();

    assert_eq!(result.downloaded, 4);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.queued, 6);
    assert_eq!(result.assess().unwrap(), RunOutcome::Partial);
}

#[tokio::test]
async fn test_pipeline_skips_with_half_the_limit_downloaded_is_complete() {
    let task = ScriptedTask {
        not_found: HashSet::from([2, 4]),
        ..ScriptedTask::default()
    };
    let criteria = FilterCriteria {
        limit: 8,
        ..FilterCriteria::default()
    };

    let result = pipeline(1)
        .run(candidates(6), &criteria, ItemType::Novel, &task)
        .await
        .unwrap();

    assert_eq!(result.downloaded, 4);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.assess().unwrap(), RunOutcome::Completed);
}

#[tokio::test]
async fn test_pipeline_fatal_error_aborts_run() {
    let task = ScriptedTask {
        fatal: HashSet::from([1]),
        ..ScriptedTask::default()
    };
    let criteria = FilterCriteria {
        limit: 3,
        ..FilterCriteria::default()
    };

    let err = pipeline(1)
        .run(candidates(3), &criteria, ItemType::Illustration, &task)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Execution(ExecutorError::Aborted { index: 0, .. })
    ));
    assert_eq!(task.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pipeline_everything_skipped_is_a_failure() {
    let task = ScriptedTask {
        not_found: (1..=4).collect(),
        ..ScriptedTask::default()
    };
    let criteria = FilterCriteria {
        limit: 4,
        ..FilterCriteria::default()
    };

    let result = pipeline(2)
        .run(candidates(4), &criteria, ItemType::Illustration, &task)
        .await
        .unwrap();

    assert_eq!(result.downloaded, 0);
    assert_eq!(result.skipped, 4);
    let err = result.assess().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NothingDownloaded {
            requested: 4,
            skipped: 4,
            ..
        }
    ));
}

#[tokio::test]
async fn test_pipeline_no_candidates_is_soft_success() {
    let task = ScriptedTask::default();
    let criteria = FilterCriteria::default();
    let result = pipeline(3)
        .run(Vec::new(), &criteria, ItemType::Illustration, &task)
        .await
        .unwrap();

    assert_eq!(result.assess().unwrap(), RunOutcome::NoCandidates);
    assert_eq!(task.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pipeline_all_filtered_is_soft_success() {
    let task = ScriptedTask::default();
    let criteria = FilterCriteria {
        min_bookmarks: Some(1_000),
        ..FilterCriteria::default()
    };

    let result = pipeline(3)
        .run(candidates(5), &criteria, ItemType::Illustration, &task)
        .await
        .unwrap();

    assert_eq!(result.filtered_out, 5);
    assert_eq!(result.assess().unwrap(), RunOutcome::AllFilteredOut);
}

#[derive(Default)]
struct CollectingReporter {
    updates: Mutex<Vec<(usize, usize, Option<String>)>>,
}

impl ProgressReporter for CollectingReporter {
    fn update(&self, current: usize, total: usize, message: Option<&str>) {
        self.updates
            .lock()
            .unwrap()
            .push((current, total, message.map(ToString::to_string)));
    }
}

#[tokio::test]
async fn test_pipeline_skipped_item_still_reports_progress() {
    let task = ScriptedTask {
        not_found: HashSet::from([1]),
        ..ScriptedTask::default()
    };
    let criteria = FilterCriteria {
        limit: 2,
        ..FilterCriteria::default()
    };
    let reporter = Arc::new(CollectingReporter::default());

    let result = pipeline(1)
        .with_progress(reporter.clone())
        .run(candidates(2), &criteria, ItemType::Illustration, &task)
        .await
        .unwrap();

    assert_eq!(result.downloaded, 1);
    let updates = reporter.updates.lock().unwrap();
    assert_eq!(updates[0], (0, 2, Some("starting".to_string())));
    let first = (0, 2, Some("processed 1/2, downloaded 0".to_string()));
    let second = (1, 2, Some("processed 2/2, downloaded 1".to_string()));
    assert!(updates.contains(&first));
    assert!(updates.contains(&second));
    assert!(updates.iter().all(|(current, total, _)| current <= total));
}
