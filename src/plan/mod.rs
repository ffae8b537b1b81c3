//! Planning stage: turns raw discovery results into an ordered work queue.
//!
//! Planning runs a fixed sequence of steps:
//! 1. Filter by minimum bookmarks and creation-date window
//! 2. Deduplicate by id, keeping the first occurrence
//! 3. Exclude ids the [`AlreadyDownloadedLookup`] already knows
//! 4. Select sequentially (first `limit`) or randomly (shuffled, capped)
//!
//! Each stage's output count equals its input count minus that stage's
//! removals; the counters are reported on [`PlannedDownload`].

mod criteria;
mod planner;

pub use criteria::{
    DEFAULT_LIMIT, DateRange, FilterCriteria, parse_date_range, parse_date_string,
    parse_item_timestamp,
};
pub use planner::{
    AlreadyDownloadedLookup, DownloadPlanner, PlanError, PlannedDownload, RANDOM_QUEUE_CAP,
    SelectionMode,
};
