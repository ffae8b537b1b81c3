//! Recovery decisions for failed download tasks.
//!
//! This module provides the [`RecoveryPolicy`] seam and its default
//! implementation, [`DefaultRecoveryPolicy`].
//!
//! # Overview
//!
//! When a task fails, the executor asks the policy what to do next:
//! - [`RecoveryDecision::Skip`] - give up on this item, keep the run going
//! - [`RecoveryDecision::Retry`] - try the same item again after a linear delay
//! - [`RecoveryDecision::Backoff`] - try again after a server-advised or
//!   exponential delay (rate limiting)
//! - [`RecoveryDecision::Fail`] - abort the whole run
//!
//! The default policy evaluates, in order: not-found, skipable transient
//! signature, attempt exhaustion, fatal kind, rate limit, generic retry.
//!
//! # Example
//!
//! ```
//! use illust_core::download::{
//!     DefaultRecoveryPolicy, RecoveryContext, RecoveryDecision, RecoveryPolicy, TaskError,
//! };
//!
//! let policy = DefaultRecoveryPolicy::default();
//! let error = TaskError::rate_limited("429", None);
//!
//! match policy.decide(&error, &RecoveryContext::new(1)) {
//!     RecoveryDecision::Backoff { delay, .. } => println!("waiting {delay:?}"),
//!     other => println!("{other:?}"),
//! }
//! ```

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, instrument};

use super::error::{ErrorKind, TaskError, TransientSignal};
use crate::item::ItemType;

/// Default maximum attempts per item (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for retry and backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Context handed to the policy for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryContext {
    /// The attempt that just failed (1-indexed).
    pub attempt: u32,
    /// Remote id of the item, when known.
    pub item_id: Option<u64>,
    /// Kind of item, when known.
    pub item_type: Option<ItemType>,
}

impl RecoveryContext {
    /// Creates a context for the given attempt with no item details.
    #[must_use]
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            item_id: None,
            item_type: None,
        }
    }

    /// Sets the item id.
    #[must_use]
    pub fn with_item_id(mut self, item_id: u64) -> Self {
        self.item_id = Some(item_id);
        self
    }

    /// Sets the item type.
    #[must_use]
    pub fn with_item_type(mut self, item_type: ItemType) -> Self {
        self.item_type = Some(item_type);
        self
    }
}

/// The policy's verdict on a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Try the same item again after `delay`.
    Retry {
        /// Wait before the next attempt.
        delay: Duration,
        /// Attempt cap for this item, overriding the executor default.
        max_attempts: Option<u32>,
        /// Human-readable reason.
        reason: Option<String>,
    },
    /// Try the same item again after a throttling delay.
    Backoff {
        /// Wait before the next attempt.
        delay: Duration,
        /// Attempt cap for this item, overriding the executor default.
        max_attempts: Option<u32>,
        /// Human-readable reason.
        reason: Option<String>,
    },
    /// Give up on this item and continue.
    Skip {
        /// Human-readable reason.
        reason: Option<String>,
    },
    /// Abort the run.
    Fail {
        /// Human-readable reason.
        reason: Option<String>,
    },
}

impl RecoveryDecision {
    /// Returns the stable label for logs.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::Backoff { .. } => "backoff",
            Self::Skip { .. } => "skip",
            Self::Fail { .. } => "fail",
        }
    }

    /// Returns the reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Retry { reason, .. }
            | Self::Backoff { reason, .. }
            | Self::Skip { reason }
            | Self::Fail { reason } => reason.as_deref(),
        }
    }

    /// Returns the wait for retry/backoff decisions.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry { delay, .. } | Self::Backoff { delay, .. } => Some(*delay),
            Self::Skip { .. } | Self::Fail { .. } => None,
        }
    }

    fn skip(reason: &str) -> Self {
        Self::Skip {
            reason: Some(reason.to_string()),
        }
    }

    fn fail(reason: &str) -> Self {
        Self::Fail {
            reason: Some(reason.to_string()),
        }
    }
}

/// Decides how to handle a failed task attempt.
///
/// Implementations must be pure: no I/O, no shared mutable state.
pub trait RecoveryPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the decision for `error` at `context.attempt`.
    fn decide(&self, error: &TaskError, context: &RecoveryContext) -> RecoveryDecision;
}

/// Default recovery policy.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 500ms
/// - `max_delay`: 5000ms (never below `base_delay`)
/// - skipable signals: timeout, connection refused, DNS failure,
///   connection reset, forbidden
///
/// # Delay Calculation
///
/// ```text
/// backoff = server_advised_wait or min(base_delay * 2^(attempt-1), max_delay)
/// retry   = min(base_delay * attempt, max_delay)
/// ```
#[derive(Debug, Clone)]
pub struct DefaultRecoveryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    skipable: HashSet<TransientSignal>,
}

impl Default for DefaultRecoveryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl DefaultRecoveryPolicy {
    /// Creates a policy with custom limits.
    ///
    /// `max_attempts` is raised to at least 1 and `max_delay` to at least
    /// `base_delay`.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            skipable: default_skipable_signals(),
        }
    }

    /// Creates a policy with a custom attempt cap and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    /// Replaces the set of transient signals that skip without retrying.
    #[must_use]
    pub fn with_skipable_signals(
        mut self,
        signals: impl IntoIterator<Item = TransientSignal>,
    ) -> Self {
        self.skipable = signals.into_iter().collect();
        self
    }

    /// Returns the configured attempt cap.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the configured base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the configured delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    fn is_skipable(&self, error: &TaskError) -> bool {
        error
            .signal()
            .is_some_and(|signal| self.skipable.contains(&signal))
    }

    /// `min(base * 2^(attempt-1), max)`
    fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// `min(base * attempt, max)`
    fn linear_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(attempt)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl RecoveryPolicy for DefaultRecoveryPolicy {
    #[instrument(level = "debug", skip(self, error), fields(kind = %error.kind(), attempt = context.attempt))]
    fn decide(&self, error: &TaskError, context: &RecoveryContext) -> RecoveryDecision {
        let attempt = context.attempt.max(1);

        if error.kind() == ErrorKind::NotFound {
            return RecoveryDecision::skip("not found or item is private");
        }

        if self.is_skipable(error) {
            return RecoveryDecision::skip("skipable transient failure");
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RecoveryDecision::fail("max attempts reached");
        }

        match error.kind() {
            ErrorKind::Fatal => RecoveryDecision::fail("fatal error"),
            ErrorKind::RateLimit => {
                let delay = error
                    .retry_after()
                    .filter(|d| !d.is_zero())
                    .unwrap_or_else(|| self.exponential_delay(attempt));
                debug!(
                    item_id = context.item_id,
                    delay_ms = delay.as_millis(),
                    "rate limited, backing off"
                );
                RecoveryDecision::Backoff {
                    delay,
                    max_attempts: Some(self.max_attempts),
                    reason: Some("rate limited".to_string()),
                }
            }
            ErrorKind::Transient | ErrorKind::NotFound => {
                let delay = self.linear_delay(attempt);
                debug!(
                    item_id = context.item_id,
                    delay_ms = delay.as_millis(),
                    "transient failure, retrying"
                );
                RecoveryDecision::Retry {
                    delay,
                    max_attempts: Some(self.max_attempts),
                    reason: Some("transient error".to_string()),
                }
            }
        }
    }
}

fn default_skipable_signals() -> HashSet<TransientSignal> {
    [
        TransientSignal::Timeout,
        TransientSignal::ConnectionRefused,
        TransientSignal::DnsFailure,
        TransientSignal::ConnectionReset,
        TransientSignal::Forbidden,
    ]
    .into_iter()
    .collect()
}
