//! Progress reporting for pipeline runs.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

/// Receives `(current, total)` progress updates.
///
/// Fire-and-forget: implementations must not fail or block for long.
pub trait ProgressReporter: Send + Sync {
    /// Reports that `current` of `total` items are done.
    fn update(&self, current: usize, total: usize, message: Option<&str>);
}

/// Reporter that writes each update to the log at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProgressReporter;

impl ProgressReporter for LoggingProgressReporter {
    fn update(&self, current: usize, total: usize, message: Option<&str>) {
        info!(current, total, message, "progress");
    }
}

/// Reporter that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgressReporter;

impl ProgressReporter for SilentProgressReporter {
    fn update(&self, _current: usize, _total: usize, _message: Option<&str>) {}
}

type Emission = (usize, usize, Option<String>);

/// Forwards updates to a reporter, dropping exact repeats of the previous one.
pub struct ProgressEmitter {
    reporter: Arc<dyn ProgressReporter>,
    last: Mutex<Option<Emission>>,
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter").finish_non_exhaustive()
    }
}

impl ProgressEmitter {
    /// Wraps `reporter`.
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            last: Mutex::new(None),
        }
    }

    /// Forwards the update unless it equals the previous one.
    ///
    /// Returns true when the update was forwarded.
    pub fn emit(&self, current: usize, total: usize, message: Option<&str>) -> bool {
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            let emission = (current, total, message.map(ToString::to_string));
            if last.as_ref() == Some(&emission) {
                return false;
            }
            *last = Some(emission);
        }
        self.reporter.update(current, total, message);
        true
    }
}
