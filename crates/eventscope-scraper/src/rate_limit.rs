//! Per-target request budgets.
//!
//! Each target keeps a log of the requests admitted in the last minute; any
//! rolling 60 second span holds at most `requests_per_minute` of them.
//! Independently of the budget, once `burst_size` requests are in the log
//! further requests must be spaced at least `inter_request_delay` apart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use eventscope_core::RateLimitConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const WINDOW: Duration = Duration::from_secs(60);

/// Result of one [`RateLimiter::check_and_consume`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request was admitted and counted.
    Allowed,
    /// Within budget but too soon after the previous request.
    Throttled { retry_after: Duration },
    /// The budget is spent until the oldest admitted request ages out.
    Limited {
        retry_after: Duration,
        reset_at: Instant,
    },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }

    #[must_use]
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimitDecision::Allowed => Duration::ZERO,
            RateLimitDecision::Throttled { retry_after }
            | RateLimitDecision::Limited { retry_after, .. } => *retry_after,
        }
    }
}

/// Snapshot of one target's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitState {
    /// Requests admitted in the last minute.
    pub request_count: u32,
    /// Admission time of the oldest request still counted.
    pub window_start: Instant,
    pub is_limited: bool,
    pub reset_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Window {
    admitted: VecDeque<Instant>,
    last_request_at: Option<Instant>,
    limited: bool,
    reset_at: Option<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
        if self.reset_at.is_some_and(|at| now >= at) {
            self.limited = false;
            self.reset_at = None;
        }
    }

    fn count(&self) -> u32 {
        u32::try_from(self.admitted.len()).unwrap_or(u32::MAX)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admits and counts one request for `target_id`, or reports how long to
    /// wait. Denied checks are not counted.
    pub async fn check_and_consume(&self, target_id: &str) -> RateLimitDecision {
        let now = Instant::now();
        let budget = self.config.requests_per_minute.max(1);
        let mut windows = self.windows.lock().await;
        let window = windows.entry(target_id.to_string()).or_default();
        window.prune(now);

        if window.count() >= budget {
            let oldest = window.admitted.front().copied().unwrap_or(now);
            let reset_at = oldest + WINDOW;
            window.limited = true;
            window.reset_at = Some(reset_at);
            return RateLimitDecision::Limited {
                retry_after: reset_at.saturating_duration_since(now),
                reset_at,
            };
        }

        if window.count() >= self.config.burst_size {
            if let Some(last) = window.last_request_at {
                let since = now.duration_since(last);
                if since < self.config.inter_request_delay {
                    return RateLimitDecision::Throttled {
                        retry_after: self.config.inter_request_delay - since,
                    };
                }
            }
        }

        window.admitted.push_back(now);
        window.last_request_at = Some(now);
        RateLimitDecision::Allowed
    }

    /// Suspends until a request slot for `target_id` is available, then
    /// consumes it.
    pub async fn wait_until_allowed(&self, target_id: &str) {
        loop {
            let decision = self.check_and_consume(target_id).await;
            if decision.is_allowed() {
                return;
            }
            let wait = decision.retry_after().max(Duration::from_millis(1));
            #[allow(clippy::cast_possible_truncation)]
            let wait_ms = wait.as_millis() as u64;
            tracing::debug!(target_id, wait_ms, "rate limited; waiting for next slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Whether the last minute's budget is spent. Does not consume.
    pub async fn is_limited(&self, target_id: &str) -> bool {
        let now = Instant::now();
        let budget = self.config.requests_per_minute.max(1);
        let windows = self.windows.lock().await;
        windows.get(target_id).is_some_and(|w| {
            let live = w
                .admitted
                .iter()
                .filter(|&&at| now.duration_since(at) < WINDOW)
                .count();
            u32::try_from(live).unwrap_or(u32::MAX) >= budget
        })
    }

    pub async fn state(&self, target_id: &str) -> Option<RateLimitState> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows.get_mut(target_id)?;
        window.prune(now);
        Some(RateLimitState {
            request_count: window.count(),
            window_start: window.admitted.front().copied().unwrap_or(now),
            is_limited: window.limited,
            reset_at: window.reset_at,
        })
    }
}
