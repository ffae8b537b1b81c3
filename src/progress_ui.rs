//! Progress bar for download runs.

use std::time::Duration;

use illust_core::pipeline::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner} [{bar:30}] {pos}/{len} {msg}";

/// Renders pipeline progress as an indicatif bar.
///
/// The bar length follows the `total` of each update, so it tracks the
/// effective download limit rather than the candidate count.
#[derive(Debug, Clone)]
pub(crate) struct BarProgressReporter {
    bar: ProgressBar,
}

impl BarProgressReporter {
    /// Creates a visible bar ticking on its own.
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Creates a bar that draws nothing.
    #[cfg(test)]
    fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Clears the bar from the terminal.
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for BarProgressReporter {
    fn update(&self, current: usize, total: usize, message: Option<&str>) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
        if let Some(message) = message {
            self.bar.set_message(message.to_string());
        }
    }
}
