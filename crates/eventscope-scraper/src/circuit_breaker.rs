//! Per-target circuit breakers.
//!
//! A breaker opens once `threshold` failures land inside the rolling
//! `window`, rejects every call for `cooldown`, then admits a single probe.
//! A successful probe closes it; a failed probe re-opens it. A probe that
//! never reports back (its future was dropped) is abandoned after another
//! cooldown and the next caller becomes the probe. Successes only
//! forgive one failure each, so a flapping target is not trusted again after
//! one good response.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub threshold: usize,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    /// Cooldown elapsed; the next call is admitted as a probe.
    HalfOpen,
}

/// Point-in-time view of one target's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub failure_count: usize,
    pub is_open: bool,
    pub last_failure_at: Option<Instant>,
    pub next_attempt_at: Option<Instant>,
    pub success_count: u32,
}

#[derive(Debug, Default)]
struct Breaker {
    recent_failures: VecDeque<Instant>,
    open: bool,
    next_attempt_at: Option<Instant>,
    success_count: u32,
    probe_claimed_at: Option<Instant>,
}

impl Breaker {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent_failures.front() {
            if now.duration_since(oldest) > window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn status(&self, now: Instant) -> CircuitStatus {
        match (self.open, self.next_attempt_at) {
            (false, _) => CircuitStatus::Closed,
            (true, Some(at)) if now >= at => CircuitStatus::HalfOpen,
            (true, _) => CircuitStatus::Open,
        }
    }

    fn trip(&mut self, now: Instant, cooldown: Duration) {
        self.open = true;
        self.next_attempt_at = Some(now + cooldown);
        self.success_count = 0;
        self.probe_claimed_at = None;
    }

    /// A probe claimed a full cooldown ago without reporting is abandoned.
    fn probe_outstanding(&self, now: Instant, cooldown: Duration) -> bool {
        self.probe_claimed_at
            .is_some_and(|claimed| now.duration_since(claimed) < cooldown)
    }

    fn retry_after(&self, now: Instant) -> Duration {
        self.next_attempt_at
            .map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
    }

    fn probe_retry_after(&self, now: Instant, cooldown: Duration) -> Duration {
        self.probe_claimed_at.map_or(Duration::ZERO, |claimed| {
            (claimed + cooldown).saturating_duration_since(now)
        })
    }
}

/// Breakers for every target the process has touched, keyed by target id.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admits or rejects a call for `target_id`.
    ///
    /// Once the cooldown has elapsed the first caller is admitted as the
    /// half-open probe; callers arriving while the probe is outstanding are
    /// still rejected.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CircuitBreakerTripped`] while the breaker is open.
    pub async fn check(&self, target_id: &str) -> Result<(), EngineError> {
        let now = Instant::now();
        let mut breakers = self.breakers.lock().await;
        let Some(breaker) = breakers.get_mut(target_id) else {
            return Ok(());
        };
        match breaker.status(now) {
            CircuitStatus::Closed => Ok(()),
            CircuitStatus::HalfOpen if !breaker.probe_outstanding(now, self.config.cooldown) => {
                if breaker.probe_claimed_at.is_some() {
                    tracing::warn!(target_id, "half-open probe abandoned; admitting another");
                } else {
                    tracing::info!(target_id, "circuit breaker half-open; admitting probe");
                }
                breaker.probe_claimed_at = Some(now);
                Ok(())
            }
            CircuitStatus::HalfOpen => Err(EngineError::CircuitBreakerTripped {
                target_id: target_id.to_string(),
                retry_after: breaker.probe_retry_after(now, self.config.cooldown),
            }),
            CircuitStatus::Open => Err(EngineError::CircuitBreakerTripped {
                target_id: target_id.to_string(),
                retry_after: breaker.retry_after(now),
            }),
        }
    }

    /// Remaining cooldown if the breaker would reject a call right now.
    /// Unlike [`Self::check`] this never claims the half-open probe.
    pub async fn is_open(&self, target_id: &str) -> Option<Duration> {
        let now = Instant::now();
        let breakers = self.breakers.lock().await;
        let breaker = breakers.get(target_id)?;
        match breaker.status(now) {
            CircuitStatus::Closed => None,
            CircuitStatus::HalfOpen if !breaker.probe_outstanding(now, self.config.cooldown) => {
                None
            }
            CircuitStatus::HalfOpen => Some(breaker.probe_retry_after(now, self.config.cooldown)),
            CircuitStatus::Open => Some(breaker.retry_after(now)),
        }
    }

    pub async fn record_success(&self, target_id: &str) {
        let now = Instant::now();
        let mut breakers = self.breakers.lock().await;
        let Some(breaker) = breakers.get_mut(target_id) else {
            return;
        };
        breaker.prune(now, self.config.window);
        breaker.recent_failures.pop_front();
        breaker.success_count = breaker.success_count.saturating_add(1);
        if breaker.probe_claimed_at.is_some() {
            breaker.open = false;
            breaker.next_attempt_at = None;
            breaker.probe_claimed_at = None;
            tracing::info!(
                target_id,
                failure_count = breaker.recent_failures.len(),
                "circuit breaker closed after successful probe"
            );
        }
    }

    /// Records a failure and returns the breaker's status afterwards.
    pub async fn record_failure(&self, target_id: &str) -> CircuitStatus {
        let now = Instant::now();
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(target_id.to_string()).or_default();
        breaker.prune(now, self.config.window);
        breaker.recent_failures.push_back(now);

        if breaker.probe_claimed_at.is_some() {
            breaker.trip(now, self.config.cooldown);
            tracing::warn!(target_id, "half-open probe failed; circuit breaker re-opened");
        } else if !breaker.open && breaker.recent_failures.len() >= self.config.threshold {
            breaker.trip(now, self.config.cooldown);
            tracing::warn!(
                target_id,
                failures = breaker.recent_failures.len(),
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
        breaker.status(now)
    }

    pub async fn status(&self, target_id: &str) -> CircuitStatus {
        let now = Instant::now();
        self.breakers
            .lock()
            .await
            .get(target_id)
            .map_or(CircuitStatus::Closed, |b| b.status(now))
    }

    pub async fn state(&self, target_id: &str) -> Option<CircuitBreakerState> {
        let now = Instant::now();
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.get_mut(target_id)?;
        breaker.prune(now, self.config.window);
        Some(CircuitBreakerState {
            failure_count: breaker.recent_failures.len(),
            is_open: breaker.open,
            last_failure_at: breaker.recent_failures.back().copied(),
            next_attempt_at: breaker.next_attempt_at,
            success_count: breaker.success_count,
        })
    }

    /// Target ids whose breakers are currently open or half-open, sorted.
    pub async fn open_targets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .breakers
            .lock()
            .await
            .iter()
            .filter(|(_, b)| b.open)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Forgets all history for `target_id`.
    pub async fn reset(&self, target_id: &str) {
        self.breakers.lock().await.remove(target_id);
    }
}

#[cfg(test)]
#[path = "circuit_breaker_test.rs"]
mod tests;
