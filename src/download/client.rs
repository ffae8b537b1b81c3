//! HTTP client wrapper for fetching item pages.
//!
//! This module provides the `HttpClient` struct, which fetches one remote
//! resource and maps every failure into the [`TaskError`] taxonomy so that
//! the recovery policy can act on it.
//!
//! # Status Classification
//!
//! | Response | Error |
//! |----------|-------|
//! | 404, 410 | `NotFound` |
//! | 429 | `RateLimit` (with `Retry-After`) |
//! | 403 | `Transient(Forbidden)` |
//! | 408, 5xx | `Transient(Other)` |
//! | other 4xx | `Fatal` |
//! | timeout / refused / DNS / reset | `Transient` with that signal |

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, REFERER, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_REFERER, MAX_RETRY_AFTER, READ_TIMEOUT_SECS};
use super::error::{TaskError, TransientSignal};
use crate::user_agent;

/// A fetched resource held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// Response body.
    pub body: Vec<u8>,
    /// `Content-Type` header, when present.
    pub content_type: Option<String>,
}

/// HTTP client for fetching item pages.
///
/// Create once and reuse; the inner client pools connections.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    referer: Option<String>,
}

impl HttpClient {
    /// Creates a client with default timeouts and the default referer.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_download_user_agent())
            .build()?;
        Ok(Self {
            client,
            referer: Some(DEFAULT_REFERER.to_string()),
        })
    }

    /// Replaces the `Referer` header sent with each request.
    #[must_use]
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    /// Fetches `url` into memory.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskError`] classified per the table in the module docs.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<FetchedResource, TaskError> {
        let mut request = self.client.get(url);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e).with_source(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(classify_status(url, status, retry_after));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(url, &e).with_source(e))?;

        debug!(bytes = body.len(), "fetched resource");
        Ok(FetchedResource {
            body: body.to_vec(),
            content_type,
        })
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a non-success HTTP status into a task error.
#[must_use]
pub fn classify_status(url: &str, status: StatusCode, retry_after: Option<Duration>) -> TaskError {
    let code = status.as_u16();
    let message = format!("HTTP {code} for {url}");
    match code {
        404 | 410 => TaskError::not_found(message),
        429 => TaskError::rate_limited(message, retry_after),
        403 => TaskError::transient(TransientSignal::Forbidden, message),
        408 | 500..=599 => TaskError::transient(TransientSignal::Other, message),
        _ => TaskError::fatal(message),
    }
}

/// Maps a transport-level error (no HTTP status) into a task error.
fn classify_transport_error(url: &str, error: &reqwest::Error) -> TaskError {
    if error.is_timeout() {
        return TaskError::transient(TransientSignal::Timeout, format!("timed out: {url}"));
    }

    let chain = error_chain(error);
    let mut signal = TransientSignal::from_message(&chain);
    if signal == TransientSignal::Other && error.is_connect() {
        signal = TransientSignal::ConnectionRefused;
    }
    TaskError::transient(signal, format!("{url}: {chain}"))
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut current = error.source();
    while let Some(cause) = current {
        parts.push(cause.to_string());
        current = cause.source();
    }
    parts.join(": ")
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds (`Retry-After: 120`) and HTTP-dates
/// (`Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`). Returns `None` if the
/// value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use illust_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(cap_retry_after(duration));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, cap_retry_after),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        return MAX_RETRY_AFTER;
    }
    duration
}
