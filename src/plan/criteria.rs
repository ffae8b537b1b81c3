//! Per-run filter criteria and date-range handling.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::warn;

/// Queue size used when the caller does not set a positive limit.
pub const DEFAULT_LIMIT: usize = 10;

/// Caller-supplied filters and selection settings for one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    /// Drop items with fewer bookmarks than this.
    pub min_bookmarks: Option<u64>,
    /// Inclusive lower date bound (`YYYY-MM-DD`, UTC).
    pub start_date: Option<String>,
    /// Inclusive upper date bound (`YYYY-MM-DD`, UTC, whole day).
    pub end_date: Option<String>,
    /// Number of items to download. Zero means "use the default".
    pub limit: usize,
    /// Shuffle available items instead of taking them in order.
    pub random_selection: bool,
    /// Label passed to the download task and used in logs.
    pub tag: Option<String>,
}

impl FilterCriteria {
    /// Returns the effective limit (defaults to [`DEFAULT_LIMIT`] when unset).
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        if self.limit > 0 {
            self.limit
        } else {
            DEFAULT_LIMIT
        }
    }

    /// Returns the tag for log output, or `"unknown"`.
    #[must_use]
    pub fn tag_or_unknown(&self) -> &str {
        self.tag.as_deref().unwrap_or("unknown")
    }

    /// Returns true when either date bound is configured.
    #[must_use]
    pub fn has_date_filter(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }
}

/// Parsed inclusive date window. A `None` bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Start of the first day (00:00:00 UTC).
    pub start: Option<DateTime<Utc>>,
    /// End of the last day (23:59:59.999 UTC).
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Returns true when `instant` falls inside both bounds.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        if self.start.is_some_and(|start| instant < start) {
            return false;
        }
        if self.end.is_some_and(|end| instant > end) {
            return false;
        }
        true
    }
}

/// Parses a strict `YYYY-MM-DD` date.
///
/// Returns `None` for other layouts and for impossible dates such as
/// `2024-02-30`.
#[must_use]
pub fn parse_date_string(value: &str) -> Option<NaiveDate> {
    if !has_iso_date_shape(value) {
        warn!(date = value, "invalid date format, expected YYYY-MM-DD");
        return None;
    }

    let parsed = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok();
    if parsed.is_none() {
        warn!(date = value, "invalid date (out of range)");
    }
    parsed
}

/// True for exactly four, two and two ASCII digits joined by `-`.
///
/// chrono alone accepts unpadded fields and signed years.
fn has_iso_date_shape(value: &str) -> bool {
    let fields: Vec<&str> = value.split('-').collect();
    fields.len() == 3
        && fields
            .iter()
            .zip([4, 2, 2])
            .all(|(field, width)| field.len() == width && field.bytes().all(|b| b.is_ascii_digit()))
}

/// Builds a date window from optional bound strings.
///
/// A bound that fails to parse is treated as unset. Returns `None` when both
/// bounds parse and the start is after the end.
#[must_use]
pub fn parse_date_range(start: Option<&str>, end: Option<&str>) -> Option<DateRange> {
    let start_date = start.and_then(parse_date_string);
    let end_date = end.and_then(parse_date_string);

    if let (Some(s), Some(e)) = (start_date, end_date)
        && s > e
    {
        return None;
    }

    let start_of_day = NaiveTime::MIN;
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);

    Some(DateRange {
        start: start_date.map(|d| d.and_time(start_of_day).and_utc()),
        end: end_date.map(|d| d.and_time(end_of_day).and_utc()),
    })
}

/// Parses an item timestamp as sent by the remote source.
///
/// Accepts RFC 3339 (with offset), a naive `YYYY-MM-DDTHH:MM:SS` (taken as
/// UTC) and a bare `YYYY-MM-DD`.
#[must_use]
pub fn parse_item_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}
