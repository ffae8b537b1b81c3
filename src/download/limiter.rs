//! Adaptive concurrency limiting for homogeneous batches.
//!
//! [`AdaptiveLimiter`] runs a processor over a batch (for example the pages
//! of one item) with global request pacing and a live concurrency that
//! shrinks when the remote starts rate limiting. It never retries and never
//! drops an item: every input gets a positionally aligned [`ProcessResult`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use illust_core::download::{LimiterConfig, TaskError, process_in_parallel};
//!
//! # async fn example() {
//! let pages = vec!["p0", "p1", "p2"];
//! let results = process_in_parallel(
//!     pages,
//!     |page, _index| async move { Ok::<_, TaskError>(page.len()) },
//!     2,
//!     LimiterConfig::default(),
//! )
//! .await;
//! assert_eq!(results.len(), 3);
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::error::TaskError;

/// Default spacing between request starts.
const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(500);

/// Outcome of processing one item. Never an executor-level error.
pub type ProcessResult<R> = Result<R, TaskError>;

/// Pacing and adaptation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Minimum spacing between the starts of two tasks.
    pub request_delay: Duration,
    /// Shrink and restore concurrency in response to rate limiting.
    pub dynamic_concurrency: bool,
    /// Floor for the live concurrency.
    pub min_concurrency: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            request_delay: DEFAULT_REQUEST_DELAY,
            dynamic_concurrency: true,
            min_concurrency: 1,
        }
    }
}

/// What one recorded outcome did to the live concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Unchanged,
    Reduced,
    Restored,
    /// Rate limited while already at `min_concurrency`.
    AtFloor,
}

#[derive(Debug)]
struct LiveState {
    live: usize,
    rate_limit_count: usize,
}

/// Concurrency limiter with global pacing and rate-limit adaptation.
///
/// The live concurrency only gates how many *new* tasks start; tasks
/// already running are never interrupted when it shrinks.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    max_concurrency: usize,
    config: LimiterConfig,
    state: Mutex<LiveState>,
    /// Start time of the most recent task. Held across the pacing sleep so
    /// that starts are spaced globally.
    last_start: tokio::sync::Mutex<Option<Instant>>,
    lowest: AtomicUsize,
}

impl AdaptiveLimiter {
    /// Creates a limiter.
    ///
    /// `concurrency` is raised to at least 1; `min_concurrency` is clamped
    /// into `1..=concurrency`.
    #[must_use]
    pub fn new(concurrency: usize, config: LimiterConfig) -> Self {
        let max_concurrency = concurrency.max(1);
        let config = LimiterConfig {
            min_concurrency: config.min_concurrency.clamp(1, max_concurrency),
            ..config
        };
        Self {
            max_concurrency,
            config,
            state: Mutex::new(LiveState {
                live: max_concurrency,
                rate_limit_count: 0,
            }),
            last_start: tokio::sync::Mutex::new(None),
            lowest: AtomicUsize::new(max_concurrency),
        }
    }

    /// Returns the currently permitted number of concurrently started tasks.
    #[must_use]
    pub fn live_concurrency(&self) -> usize {
        self.lock_state().live
    }

    /// Returns the lowest live concurrency seen so far.
    #[must_use]
    pub fn lowest_concurrency(&self) -> usize {
        self.lowest.load(Ordering::SeqCst)
    }

    /// Returns the effective configuration.
    #[must_use]
    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    /// Processes every item and returns their outcomes in input order.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.max_concurrency))]
    pub async fn process<T, R, F, Fut>(&self, items: Vec<T>, processor: F) -> Vec<ProcessResult<R>>
    where
        F: Fn(T, usize) -> Fut,
        Fut: Future<Output = ProcessResult<R>>,
    {
        if self.max_concurrency == 1 {
            return self.process_sequential(items, processor).await;
        }

        let total = items.len();
        let mut results: Vec<Option<ProcessResult<R>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        let mut pending = items.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.live_concurrency() {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                let processor = &processor;
                in_flight.push(async move {
                    self.pace().await;
                    (index, processor(item, index).await)
                });
            }

            let Some((index, outcome)) = in_flight.next().await else {
                break;
            };
            self.record(&outcome);
            if let Some(slot) = results.get_mut(index) {
                *slot = Some(outcome);
            }
        }

        results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(TaskError::fatal("task produced no result"))))
            .collect()
    }

    async fn process_sequential<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        processor: F,
    ) -> Vec<ProcessResult<R>>
    where
        F: Fn(T, usize) -> Fut,
        Fut: Future<Output = ProcessResult<R>>,
    {
        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }
            results.push(processor(item, index).await);
        }
        results
    }

    /// Waits until `request_delay` has passed since the previous start.
    async fn pace(&self) {
        if self.config.request_delay.is_zero() {
            return;
        }
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            let elapsed = previous.elapsed();
            if elapsed < self.config.request_delay {
                let delay = self.config.request_delay.saturating_sub(elapsed);
                debug!(delay_ms = delay.as_millis(), "pacing request");
                tokio::time::sleep(delay).await;
            }
        }
        *last_start = Some(Instant::now());
    }

    fn record<R>(&self, outcome: &ProcessResult<R>) -> Adjustment {
        if !self.config.dynamic_concurrency {
            return Adjustment::Unchanged;
        }
        let mut state = self.lock_state();
        match outcome {
            Ok(_) => {
                if state.live < self.max_concurrency && state.rate_limit_count > 0 {
                    state.rate_limit_count -= 1;
                    if state.rate_limit_count == 0 {
                        let restored = (state.live + 1).min(self.max_concurrency);
                        info!(from = state.live, to = restored, "restoring concurrency");
                        state.live = restored;
                        return Adjustment::Restored;
                    }
                }
                Adjustment::Unchanged
            }
            Err(error) if error.is_rate_limit() => {
                state.rate_limit_count += 1;
                let reduced = (state.live / 2).max(self.config.min_concurrency);
                if reduced < state.live {
                    warn!(
                        from = state.live,
                        to = reduced,
                        rate_limit_count = state.rate_limit_count,
                        "rate limited, reducing concurrency"
                    );
                    state.live = reduced;
                    self.lowest.fetch_min(reduced, Ordering::SeqCst);
                    Adjustment::Reduced
                } else {
                    warn!(
                        live = state.live,
                        min = self.config.min_concurrency,
                        rate_limit_count = state.rate_limit_count,
                        "rate limited, concurrency already at minimum"
                    );
                    Adjustment::AtFloor
                }
            }
            Err(_) => Adjustment::Unchanged,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Processes `items` with a fresh [`AdaptiveLimiter`].
pub async fn process_in_parallel<T, R, F, Fut>(
    items: Vec<T>,
    processor: F,
    concurrency: usize,
    config: LimiterConfig,
) -> Vec<ProcessResult<R>>
where
    F: Fn(T, usize) -> Fut,
    Fut: Future<Output = ProcessResult<R>>,
{
    AdaptiveLimiter::new(concurrency, config)
        .process(items, processor)
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::error::TransientSignal;

    fn unpaced() -> LimiterConfig {
        LimiterConfig {
            request_delay: Duration::ZERO,
            ..LimiterConfig::default()
        }
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_limiter_clamps_min_concurrency() {
        let limiter = AdaptiveLimiter::new(
            4,
            LimiterConfig {
                min_concurrency: 9,
                ..LimiterConfig::default()
            },
        );
        assert_eq!(limiter.config().min_concurrency, 4);
        assert_eq!(limiter.live_concurrency(), 4);

        let limiter = AdaptiveLimiter::new(0, LimiterConfig::default());
        assert_eq!(limiter.live_concurrency(), 1);
    }

    // ==================== Processing Tests ====================

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let results = process_in_parallel(
            vec![30u64, 10, 20, 0],
            |delay, index| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, TaskError>(index)
            },
            3,
            unpaced(),
        )
        .await;
        let values: Vec<usize> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failures_are_captured_not_raised() {
        let results = process_in_parallel(
            vec![1, 2, 3],
            |v, _| async move {
                if v == 2 {
                    Err(TaskError::transient(TransientSignal::Other, "HTTP 500"))
                } else {
                    Ok(v)
                }
            },
            2,
            unpaced(),
        )
        .await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_sequential_mode_spaces_items() {
        let config = LimiterConfig {
            request_delay: Duration::from_millis(20),
            ..LimiterConfig::default()
        };
        let started = Instant::now();
        let results = process_in_parallel(
            vec![1, 2, 3],
            |v, _| async move { Ok::<_, TaskError>(v) },
            1,
            config,
        )
        .await;
        assert_eq!(results.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_parallel_mode_paces_starts_globally() {
        let config = LimiterConfig {
            request_delay: Duration::from_millis(15),
            ..LimiterConfig::default()
        };
        let started = Instant::now();
        let results = process_in_parallel(
            vec![1, 2, 3, 4],
            |v, _| async move { Ok::<_, TaskError>(v) },
            4,
            config,
        )
        .await;
        assert_eq!(results.len(), 4);
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    // ==================== Adaptation Tests ====================

    #[tokio::test]
    async fn test_rate_limits_halve_concurrency_down_to_floor() {
        let limiter = AdaptiveLimiter::new(
            8,
            LimiterConfig {
                request_delay: Duration::ZERO,
                dynamic_concurrency: true,
                min_concurrency: 2,
            },
        );
        let results = limiter
            .process((0..20).collect::<Vec<u32>>(), |_, _| async {
                Err::<(), _>(TaskError::rate_limited("429", None))
            })
            .await;
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(Result::is_err));
        assert_eq!(limiter.live_concurrency(), 2);
        assert_eq!(limiter.lowest_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_success_after_rate_limit_restores_one_step() {
        let limiter = AdaptiveLimiter::new(4, unpaced());
        limiter.record::<()>(&Err(TaskError::rate_limited("429", None)));
        assert_eq!(limiter.live_concurrency(), 2);
        assert_eq!(limiter.record(&Ok(())), Adjustment::Restored);
        assert_eq!(limiter.live_concurrency(), 3);
        assert_eq!(limiter.record(&Ok(())), Adjustment::Unchanged);
        assert_eq!(limiter.live_concurrency(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_at_floor_is_reported_without_change() {
        let limiter = AdaptiveLimiter::new(
            4,
            LimiterConfig {
                min_concurrency: 2,
                ..unpaced()
            },
        );
        let rate_limited = || Err::<(), _>(TaskError::rate_limited("429", None));

        assert_eq!(limiter.record(&rate_limited()), Adjustment::Reduced);
        assert_eq!(limiter.live_concurrency(), 2);
        assert_eq!(limiter.record(&rate_limited()), Adjustment::AtFloor);
        assert_eq!(limiter.record(&rate_limited()), Adjustment::AtFloor);
        assert_eq!(limiter.live_concurrency(), 2);
        assert_eq!(limiter.lowest_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_static_concurrency_ignores_rate_limits() {
        let limiter = AdaptiveLimiter::new(
            4,
            LimiterConfig {
                dynamic_concurrency: false,
                ..unpaced()
            },
        );
        limiter.record::<()>(&Err(TaskError::rate_limited("429", None)));
        assert_eq!(limiter.live_concurrency(), 4);
    }
}
