//! Operation-level retries behind a target-level circuit breaker.
//!
//! [`RetryExecutor::execute_with_retry`] runs an operation until it succeeds,
//! fails in a way that is not worth retrying, runs out of attempts, or trips
//! the target's breaker. Between attempts the classifier's recommended
//! recovery is written into a [`RetryContext`] that the next attempt reads.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use eventscope_core::RetryPolicy;

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitStatus};
use crate::classify::{backoff_delay, classify, RecoveryAction};
use crate::error::{EngineError, ScrapingError};

const MAX_JITTER_MS: f64 = 1000.0;
const MAX_TIMEOUT_MULTIPLIER: f64 = 4.0;

/// Mutable state carried across attempts of one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    /// 0-based attempt about to run.
    pub attempt: u32,
    /// Added on top of the backoff delay; grows on rate limiting.
    pub extra_delay: Duration,
    /// Scales renderer timeouts; grows on timeouts.
    pub timeout_multiplier: f64,
    /// The next attempt should use a fresh session with a new identity.
    pub rotate_identity: bool,
    /// The next attempt should log in again.
    pub refresh_auth: bool,
    pub last_error: Option<ScrapingError>,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self {
            attempt: 0,
            extra_delay: Duration::ZERO,
            timeout_multiplier: 1.0,
            rotate_identity: false,
            refresh_auth: false,
            last_error: None,
        }
    }
}

impl RetryContext {
    /// Applies `timeout_multiplier` to a configured timeout.
    #[must_use]
    pub fn scale_timeout(&self, timeout: Duration) -> Duration {
        timeout.mul_f64(self.timeout_multiplier.max(1.0))
    }

    fn apply(&mut self, action: RecoveryAction, policy: &RetryPolicy) {
        self.rotate_identity = false;
        self.refresh_auth = false;
        match action {
            RecoveryAction::RotateIdentity => self.rotate_identity = true,
            RecoveryAction::IncreaseDelay => {
                self.extra_delay = (self.extra_delay + policy.base_delay).min(policy.max_delay);
            }
            RecoveryAction::IncreaseTimeout => {
                self.timeout_multiplier =
                    (self.timeout_multiplier * 1.5).min(MAX_TIMEOUT_MULTIPLIER);
            }
            RecoveryAction::RefreshAuth => self.refresh_auth = true,
            RecoveryAction::Retry | RecoveryAction::Abort => {}
        }
    }
}

/// `min(base * multiplier^attempt + jitter + extra, max)`.
///
/// Non-decreasing in `attempt` for fixed `jitter` and `extra`.
#[must_use]
pub fn compute_retry_delay(
    policy: &RetryPolicy,
    attempt: u32,
    jitter: Duration,
    extra: Duration,
) -> Duration {
    (backoff_delay(policy, attempt) + jitter + extra).min(policy.max_delay)
}

fn random_jitter() -> Duration {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ms = (rand::random::<f64>() * MAX_JITTER_MS) as u64;
    Duration::from_millis(ms)
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breakers: Arc<CircuitBreakerRegistry>,
    jitter: bool,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(policy: RetryPolicy, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            policy,
            breakers,
            jitter: true,
        }
    }

    /// Disables the random 0–1s jitter; used where delays must be exact.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` for target `id` with up to `max_retries` retries.
    ///
    /// Every failure is recorded on `id`'s circuit breaker. `context` is
    /// updated in place so the caller can inspect what recovery was applied.
    ///
    /// # Errors
    ///
    /// - [`EngineError::CircuitBreakerTripped`] if the breaker is open before
    ///   the first attempt or opens after a failure; the operation is not
    ///   invoked again.
    /// - [`EngineError::NonRetryable`] for parsing, validation, and captcha
    ///   failures, after a single attempt.
    /// - [`EngineError::RetriesExhausted`] with every attempt's error once
    ///   `1 + max_retries` attempts have failed.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        id: &str,
        mut operation: F,
        context: &mut RetryContext,
    ) -> Result<T, EngineError>
    where
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = Result<T, ScrapingError>>,
    {
        let mut history: Vec<ScrapingError> = Vec::new();
        let mut attempt = 0u32;
        loop {
            self.breakers.check(id).await?;
            context.attempt = attempt;

            let mut err = match operation(context.clone()).await {
                Ok(value) => {
                    self.breakers.record_success(id).await;
                    return Ok(value);
                }
                Err(err) => err,
            };
            err.retry_count = attempt;
            let status = self.breakers.record_failure(id).await;
            let classification = classify(&err, attempt, &self.policy);
            history.push(err.clone());
            context.last_error = Some(err.clone());

            if status != CircuitStatus::Closed {
                tracing::error!(
                    target_id = id,
                    attempt,
                    error = %err,
                    "circuit breaker open; abandoning retries"
                );
                return Err(EngineError::CircuitBreakerTripped {
                    target_id: id.to_string(),
                    retry_after: self
                        .breakers
                        .is_open(id)
                        .await
                        .unwrap_or(self.breakers.config().cooldown),
                });
            }
            if !classification.is_retryable {
                return Err(EngineError::NonRetryable {
                    operation: id.to_string(),
                    error: err,
                });
            }
            if attempt >= self.policy.max_retries {
                return Err(EngineError::RetriesExhausted {
                    operation: id.to_string(),
                    attempts: attempt + 1,
                    last: err,
                    history,
                });
            }

            context.apply(classification.recommended_action, &self.policy);
            let jitter = if self.jitter {
                random_jitter()
            } else {
                Duration::ZERO
            };
            let delay = compute_retry_delay(&self.policy, attempt, jitter, context.extra_delay);
            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            tracing::warn!(
                target_id = id,
                attempt,
                max_retries = self.policy.max_retries,
                kind = %err.kind,
                action = %classification.recommended_action,
                delay_ms,
                error = %err,
                "transient scraping error; retrying after back-off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
