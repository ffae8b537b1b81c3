//! Constants for the download module (timeouts, throttling caps).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (2 minutes per page).
pub const READ_TIMEOUT_SECS: u64 = 120;

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Referer sent with page requests; the image host rejects requests without it.
pub const DEFAULT_REFERER: &str = "https://www.pixiv.net/";
