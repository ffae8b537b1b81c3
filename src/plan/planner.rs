//! Download planning: filter, deduplicate, exclude already-downloaded, select.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::criteria::{FilterCriteria, parse_date_range, parse_item_timestamp};
use crate::item::{CandidateItem, ItemType};

/// Upper bound on the random-mode queue.
///
/// Bounds the worst-case number of attempts in random mode; it is not tied to
/// the download limit.
pub const RANDOM_QUEUE_CAP: usize = 50;

/// Errors raised while planning.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The already-downloaded lookup failed.
    #[error("already-downloaded lookup failed: {0}")]
    Lookup(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Batch membership query against previously completed downloads.
#[async_trait]
pub trait AlreadyDownloadedLookup: Send + Sync {
    /// Returns the subset of `ids` already downloaded for `item_type`.
    ///
    /// The planner never calls this with an empty id list.
    async fn downloaded_ids(
        &self,
        ids: &[String],
        item_type: ItemType,
    ) -> Result<HashSet<String>, PlanError>;
}

/// How the queue was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// First `limit` available items in discovery order.
    Sequential,
    /// Shuffled available items, capped at [`RANDOM_QUEUE_CAP`].
    Random,
}

/// Output of one planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    /// Items to attempt, in order.
    pub queue: Vec<CandidateItem>,
    /// Selection mode used to build `queue`.
    pub mode: SelectionMode,
    /// Effective download limit.
    pub limit: usize,
    /// Items removed by bookmark/date filters.
    pub filtered_out: usize,
    /// Duplicate ids removed after filtering.
    pub deduplicated: usize,
    /// Items skipped because the history already has them.
    pub already_downloaded: usize,
    /// Items left after all exclusions, before selection.
    pub available_count: usize,
    /// Number of candidates handed to the planner.
    pub original_count: usize,
    /// Random mode only: number of candidates that may be attempted.
    pub random_max_attempts: Option<usize>,
}

/// Builds work queues from raw discovery results.
#[derive(Clone)]
pub struct DownloadPlanner {
    lookup: Arc<dyn AlreadyDownloadedLookup>,
}

impl std::fmt::Debug for DownloadPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPlanner").finish_non_exhaustive()
    }
}

/// Candidates that survived filtering, deduplication and the history check.
struct Staged {
    available: Vec<CandidateItem>,
    filtered_out: usize,
    deduplicated: usize,
    already_downloaded: usize,
    original_count: usize,
}

impl DownloadPlanner {
    /// Creates a planner backed by the given already-downloaded lookup.
    #[must_use]
    pub fn new(lookup: Arc<dyn AlreadyDownloadedLookup>) -> Self {
        Self { lookup }
    }

    /// Plans one run using the thread-local random generator for random mode.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Lookup`] if the already-downloaded query fails.
    #[instrument(skip(self, items, criteria), fields(candidates = items.len(), %item_type))]
    pub async fn plan_downloads(
        &self,
        items: Vec<CandidateItem>,
        criteria: &FilterCriteria,
        item_type: ItemType,
    ) -> Result<PlannedDownload, PlanError> {
        let staged = self.stage(items, criteria, item_type).await?;
        Ok(select(staged, criteria, &mut rand::thread_rng()))
    }

    /// Plans one run with a caller-supplied random generator.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Lookup`] if the already-downloaded query fails.
    pub async fn plan_downloads_with_rng<R: Rng + Send>(
        &self,
        items: Vec<CandidateItem>,
        criteria: &FilterCriteria,
        item_type: ItemType,
        rng: &mut R,
    ) -> Result<PlannedDownload, PlanError> {
        let staged = self.stage(items, criteria, item_type).await?;
        Ok(select(staged, criteria, rng))
    }

    async fn stage(
        &self,
        items: Vec<CandidateItem>,
        criteria: &FilterCriteria,
        item_type: ItemType,
    ) -> Result<Staged, PlanError> {
        let original_count = items.len();
        let filtered = filter_items(items, criteria, item_type);
        let filtered_out = original_count - filtered.len();
        let (unique, deduplicated) = deduplicate(filtered);

        if unique.is_empty() {
            return Ok(Staged {
                available: unique,
                filtered_out,
                deduplicated,
                already_downloaded: 0,
                original_count,
            });
        }

        let ids: Vec<String> = unique.iter().map(CandidateItem::key).collect();
        let downloaded = self.lookup.downloaded_ids(&ids, item_type).await?;
        let before = unique.len();
        let available: Vec<CandidateItem> = unique
            .into_iter()
            .filter(|item| !downloaded.contains(&item.key()))
            .collect();
        let already_downloaded = before - available.len();

        if already_downloaded > 0 {
            debug!(already_downloaded, %item_type, "excluded already-downloaded items");
        }

        Ok(Staged {
            available,
            filtered_out,
            deduplicated,
            already_downloaded,
            original_count,
        })
    }
}

fn select<R: Rng + ?Sized>(
    staged: Staged,
    criteria: &FilterCriteria,
    rng: &mut R,
) -> PlannedDownload {
    let limit = criteria.effective_limit();
    let available_count = staged.available.len();

    if criteria.random_selection {
        let mut shuffled = staged.available;
        shuffle(&mut shuffled, rng);
        shuffled.truncate(RANDOM_QUEUE_CAP);
        let max_attempts = shuffled.len();
        return PlannedDownload {
            queue: shuffled,
            mode: SelectionMode::Random,
            limit,
            filtered_out: staged.filtered_out,
            deduplicated: staged.deduplicated,
            already_downloaded: staged.already_downloaded,
            available_count,
            original_count: staged.original_count,
            random_max_attempts: Some(max_attempts),
        };
    }

    let mut queue = staged.available;
    queue.truncate(limit);
    PlannedDownload {
        queue,
        mode: SelectionMode::Sequential,
        limit,
        filtered_out: staged.filtered_out,
        deduplicated: staged.deduplicated,
        already_downloaded: staged.already_downloaded,
        available_count,
        original_count: staged.original_count,
        random_max_attempts: None,
    }
}

fn filter_items(
    items: Vec<CandidateItem>,
    criteria: &FilterCriteria,
    item_type: ItemType,
) -> Vec<CandidateItem> {
    let original = items.len();
    let mut filtered = items;

    if let Some(min_bookmarks) = criteria.min_bookmarks {
        let before = filtered.len();
        filtered.retain(|item| item.popularity.bookmarks >= min_bookmarks);
        if filtered.len() < before {
            info!(
                min_bookmarks,
                before,
                after = filtered.len(),
                %item_type,
                "filtered by minimum bookmarks"
            );
        }
    }

    if criteria.has_date_filter() {
        let start = criteria.start_date.as_deref();
        let end = criteria.end_date.as_deref();
        match parse_date_range(start, end) {
            None => {
                warn!(
                    start_date = start,
                    end_date = end,
                    "invalid date range, skipping date filter"
                );
            }
            Some(range) => {
                let before = filtered.len();
                filtered.retain(|item| {
                    item.created_date
                        .as_deref()
                        .and_then(parse_item_timestamp)
                        .is_some_and(|ts| range.contains(ts))
                });
                if filtered.len() < before {
                    info!(
                        start_date = start.unwrap_or("unlimited"),
                        end_date = end.unwrap_or("unlimited"),
                        before,
                        after = filtered.len(),
                        %item_type,
                        "filtered by date range"
                    );
                }
            }
        }
    }

    if filtered.len() < original {
        info!(original, after = filtered.len(), %item_type, "total filtering applied");
    }
    filtered
}

/// Keeps the first occurrence of each id, preserving order.
fn deduplicate(items: Vec<CandidateItem>) -> (Vec<CandidateItem>, usize) {
    let before = items.len();
    let mut seen = HashSet::with_capacity(before);
    let unique: Vec<CandidateItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.id))
        .collect();
    let removed = before - unique.len();
    if removed > 0 {
        debug!(removed, "deduplicated candidates before planning");
    }
    (unique, removed)
}

/// Fisher–Yates shuffle.
fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}
