//! Error types for per-item download tasks.
//!
//! Every task failure is one of four closed kinds. The recovery policy
//! switches on [`ErrorKind`], never on the concrete source error.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Discriminator the recovery policy dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The remote item no longer exists or is private.
    NotFound,
    /// The remote throttled the request.
    RateLimit,
    /// A failure that may not repeat (network trouble, server hiccup).
    Transient,
    /// A failure that must abort the run.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not_found",
            Self::RateLimit => "rate_limit",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        };
        write!(f, "{label}")
    }
}

/// Signature of a transient failure.
///
/// The default policy treats every signal except [`TransientSignal::Other`]
/// as a per-item inaccessibility and skips the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientSignal {
    /// Request or read timed out.
    Timeout,
    /// Remote refused the connection.
    ConnectionRefused,
    /// Host name did not resolve.
    DnsFailure,
    /// Connection reset mid-transfer.
    ConnectionReset,
    /// HTTP 403 on the content itself (private or restricted).
    Forbidden,
    /// Anything else (5xx, 408, unclassified transport errors).
    Other,
}

impl TransientSignal {
    /// Classifies a free-form error message by its well-known substrings.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("etimedout")
        {
            Self::Timeout
        } else if lower.contains("econnrefused") || lower.contains("connection refused") {
            Self::ConnectionRefused
        } else if lower.contains("enotfound")
            || lower.contains("dns")
            || lower.contains("failed to lookup address")
        {
            Self::DnsFailure
        } else if lower.contains("econnreset") || lower.contains("connection reset") {
            Self::ConnectionReset
        } else if lower.contains("403") || lower.contains("forbidden") {
            Self::Forbidden
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for TransientSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection refused",
            Self::DnsFailure => "dns failure",
            Self::ConnectionReset => "connection reset",
            Self::Forbidden => "forbidden",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

/// Failure of a single download task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The remote item is gone or private.
    #[error("not found or private: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// The remote asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Context for logs.
        message: String,
        /// Server-advised wait, when the response carried one.
        retry_after: Option<Duration>,
    },

    /// A failure that may succeed on a later attempt or a different item.
    #[error("transient failure ({signal}): {message}")]
    Transient {
        /// Classified signature.
        signal: TransientSignal,
        /// Context for logs.
        message: String,
        /// Underlying error, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// A failure that must abort the whole run.
    #[error("fatal: {message}")]
    Fatal {
        /// Context for logs.
        message: String,
        /// Underlying error, when there is one.
        #[source]
        source: Option<BoxError>,
    },
}

impl TaskError {
    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a rate-limit error with an optional server-advised wait.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a transient error with an explicit signal.
    pub fn transient(signal: TransientSignal, message: impl Into<String>) -> Self {
        Self::Transient {
            signal,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error classified from its message.
    pub fn transient_from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Transient {
            signal: TransientSignal::from_message(&message),
            message,
            source: None,
        }
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a fatal error wrapping an underlying cause.
    pub fn fatal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Attaches an underlying cause to a transient or fatal error.
    #[must_use]
    pub fn with_source(self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        match self {
            Self::Transient {
                signal, message, ..
            } => Self::Transient {
                signal,
                message,
                source: Some(Box::new(cause)),
            },
            Self::Fatal { message, .. } => Self::Fatal {
                message,
                source: Some(Box::new(cause)),
            },
            other => other,
        }
    }

    /// Returns the kind the recovery policy dispatches on.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Returns the server-advised wait for rate-limit errors.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the transient signature, if this is a transient error.
    #[must_use]
    pub fn signal(&self) -> Option<TransientSignal> {
        match self {
            Self::Transient { signal, .. } => Some(*signal),
            _ => None,
        }
    }

    /// Returns true for rate-limit errors.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        self.kind() == ErrorKind::RateLimit
    }
}
