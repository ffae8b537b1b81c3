//! User-Agent string for page requests.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/illust-downloader";

/// Default User-Agent for page requests (identifies the tool).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("illust-downloader/{version} (+{PROJECT_UA_URL})")
}
