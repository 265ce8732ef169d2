use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by classification, retry, and fallback matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Parsing,
    Validation,
    RateLimit,
    Blocked,
    Timeout,
    Captcha,
    Auth,
}

impl ErrorKind {
    /// Parsing and validation failures point at configuration, and captchas
    /// need a capability this engine does not have; everything else is
    /// worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::Parsing | ErrorKind::Validation | ErrorKind::Captcha
        )
    }

    #[must_use]
    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::Validation | ErrorKind::Timeout => Severity::Low,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Parsing => Severity::Medium,
            ErrorKind::Auth | ErrorKind::Blocked => Severity::High,
            ErrorKind::Captcha => Severity::Critical,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Blocked => "blocked",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Captcha => "captcha",
            ErrorKind::Auth => "auth",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A classified scraping failure, constructed where the failure happens.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct ScrapingError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub retryable: bool,
    /// Attempt index (0-based) this failure was observed on.
    pub retry_count: u32,
    pub url: Option<String>,
    pub selector: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ScrapingError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            retryable: kind.is_retryable(),
            retry_count: 0,
            url: None,
            selector: None,
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    #[must_use]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    #[must_use]
    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Blocked, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn captcha(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Captcha, message)
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// Builds an error for an uncategorized failure by inferring its kind from
    /// the message. Prefer the typed constructors wherever the kind is known.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(infer_kind(&message), message)
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Marks an otherwise retryable failure as final.
    #[must_use]
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }
}

/// Substring inference for failures that arrive without a type.
///
/// Checked most-specific first so that, for example, a "captcha" page served
/// with a 403 is reported as a captcha rather than a plain block.
#[must_use]
pub fn infer_kind(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["captcha", "recaptcha", "hcaptcha", "are you a robot", "verify you are human"]) {
        ErrorKind::Captcha
    } else if has(&["429", "rate limit", "rate-limit", "too many requests", "throttl"]) {
        ErrorKind::RateLimit
    } else if has(&[
        "401",
        "407",
        "unauthorized",
        "unauthorised",
        "login required",
        "session expired",
        "authentication",
    ]) {
        ErrorKind::Auth
    } else if has(&["403", "forbidden", "access denied", "blocked", "cloudflare", "bot detected"]) {
        ErrorKind::Blocked
    } else if has(&["timeout", "timed out", "deadline"]) {
        ErrorKind::Timeout
    } else if has(&["parse", "selector", "unexpected token", "malformed", "not found in page"]) {
        ErrorKind::Parsing
    } else if has(&["invalid", "validation", "missing required"]) {
        ErrorKind::Validation
    } else {
        ErrorKind::Network
    }
}

/// Maps a document response status onto the taxonomy; `None` for success
/// and for statuses that do not indicate a scraping failure.
#[must_use]
pub fn error_for_status(status: u16, url: &str) -> Option<ScrapingError> {
    let err = match status {
        200..=399 => return None,
        429 => ScrapingError::rate_limited(format!("HTTP 429 from {url}")),
        401 | 407 => ScrapingError::auth(format!("HTTP {status} from {url}")),
        403 => ScrapingError::blocked(format!("HTTP 403 from {url}")),
        408 | 504 => ScrapingError::timeout(format!("HTTP {status} from {url}")),
        404 | 410 => {
            ScrapingError::validation(format!("HTTP {status} from {url}; check the target url"))
        }
        _ => ScrapingError::network(format!("unexpected HTTP status {status} from {url}")),
    };
    Some(err.with_url(url))
}

/// Outcomes of the resilience layer, wrapping the underlying scraping failure
/// where there is one.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("circuit breaker open for {target_id}; retry in {}s", retry_after.as_secs())]
    CircuitBreakerTripped {
        target_id: String,
        retry_after: Duration,
    },

    #[error("retries exhausted for {operation} after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: ScrapingError,
        history: Vec<ScrapingError>,
    },

    #[error("non-retryable failure in {operation}: {error}")]
    NonRetryable {
        operation: String,
        #[source]
        error: ScrapingError,
    },

    #[error("session {session_id} was cancelled")]
    Cancelled { session_id: String },

    #[error(transparent)]
    Scraping(#[from] ScrapingError),

    #[error("record sink failed: {0}")]
    Sink(#[from] crate::sink::SinkError),
}

impl EngineError {
    /// The last classified failure behind this error, if any.
    #[must_use]
    pub fn scraping_error(&self) -> Option<&ScrapingError> {
        match self {
            EngineError::RetriesExhausted { last, .. } => Some(last),
            EngineError::NonRetryable { error, .. } | EngineError::Scraping(error) => Some(error),
            EngineError::CircuitBreakerTripped { .. }
            | EngineError::Cancelled { .. }
            | EngineError::Sink(_) => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.scraping_error().map(|e| e.kind)
    }

    /// Every attempt's failure, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ScrapingError> {
        match self {
            EngineError::RetriesExhausted { history, .. } => history.clone(),
            other => other.scraping_error().cloned().into_iter().collect(),
        }
    }
}
