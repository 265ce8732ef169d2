//! Failure classification.
//!
//! [`classify`] turns a [`ScrapingError`] into a retry decision: whether to
//! try again, how urgently an operator should look at it, and which recovery
//! action the next attempt should apply.

use std::time::Duration;

use eventscope_core::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ScrapingError, Severity};

/// Recovery applied to the shared retry context before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Open a fresh session with a new user agent/viewport/locale.
    RotateIdentity,
    /// Wait longer than the plain backoff schedule.
    IncreaseDelay,
    /// Give the renderer more time on the next navigation.
    IncreaseTimeout,
    /// Log in again before retrying.
    RefreshAuth,
    Retry,
    Abort,
}

impl RecoveryAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryAction::RotateIdentity => "rotate_identity",
            RecoveryAction::IncreaseDelay => "increase_delay",
            RecoveryAction::IncreaseTimeout => "increase_timeout",
            RecoveryAction::RefreshAuth => "refresh_auth",
            RecoveryAction::Retry => "retry",
            RecoveryAction::Abort => "abort",
        }
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_retryable: bool,
    pub priority: Severity,
    pub category: ErrorKind,
    pub recommended_action: RecoveryAction,
    /// Backoff delay before the next attempt, without jitter.
    pub estimated_retry_delay: Duration,
}

/// Classifies `error` observed on 0-based `attempt`.
///
/// An error flagged non-retryable at its origin stays non-retryable even when
/// its kind would normally be retried.
#[must_use]
pub fn classify(error: &ScrapingError, attempt: u32, policy: &RetryPolicy) -> Classification {
    let is_retryable = error.retryable && error.kind.is_retryable();
    let recommended_action = if is_retryable {
        recovery_for(error.kind)
    } else {
        RecoveryAction::Abort
    };
    Classification {
        is_retryable,
        priority: error.severity.max(error.kind.default_severity()),
        category: error.kind,
        recommended_action,
        estimated_retry_delay: if is_retryable {
            backoff_delay(policy, attempt)
        } else {
            Duration::ZERO
        },
    }
}

fn recovery_for(kind: ErrorKind) -> RecoveryAction {
    match kind {
        ErrorKind::Blocked => RecoveryAction::RotateIdentity,
        ErrorKind::RateLimit => RecoveryAction::IncreaseDelay,
        ErrorKind::Timeout => RecoveryAction::IncreaseTimeout,
        ErrorKind::Auth => RecoveryAction::RefreshAuth,
        ErrorKind::Network => RecoveryAction::Retry,
        ErrorKind::Captcha | ErrorKind::Parsing | ErrorKind::Validation => RecoveryAction::Abort,
    }
}

/// `min(base * multiplier^attempt, max)`.
#[must_use]
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let max_ms = policy.max_delay.as_secs_f64() * 1000.0;
    let base_ms = policy.base_delay.as_secs_f64() * 1000.0;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let computed = base_ms * policy.backoff_multiplier.max(1.0).powi(exponent);
    let capped = if computed.is_finite() {
        computed.min(max_ms)
    } else {
        max_ms
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_millis(capped.max(0.0) as u64)
}
