//! Immutable per-scraper settings.
//!
//! A [`ScraperConfig`] is built once when a target scraper is constructed and
//! shared read-only by the rate limiter, session manager, and retry loop for
//! the lifetime of that scraper.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_config::AppConfig;

/// Request budget for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per fixed one-minute window.
    pub requests_per_minute: u32,
    /// Requests at the start of a window that skip the inter-request delay.
    pub burst_size: u32,
    /// Minimum spacing between requests once the burst is spent.
    #[serde(with = "duration_ms")]
    pub inter_request_delay: Duration,
}

/// Independently configurable renderer timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(with = "duration_ms")]
    pub navigation: Duration,
    #[serde(with = "duration_ms")]
    pub action: Duration,
    #[serde(with = "duration_ms")]
    pub wait: Duration,
}

/// Exponential backoff policy for operation-level retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Renderer identity presented to target sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
    /// Pick a fresh identity from the built-in pools for every session.
    pub rotate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub rate_limit: RateLimitConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryPolicy,
    pub identity: IdentityConfig,
    /// Install anti-automation countermeasures in every renderer context.
    pub stealth: bool,
    /// Upper bound on concurrently open renderer sessions per scraper.
    pub max_sessions: usize,
    /// Default pagination bound when a target does not set its own.
    pub max_pages: u32,
}

impl ScraperConfig {
    /// Derives scraper settings from the process configuration.
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            rate_limit: RateLimitConfig {
                requests_per_minute: config.requests_per_minute,
                burst_size: config.burst_size,
                inter_request_delay: Duration::from_millis(config.inter_request_delay_ms),
            },
            timeouts: TimeoutConfig {
                navigation: Duration::from_millis(config.navigation_timeout_ms),
                action: Duration::from_millis(config.action_timeout_ms),
                wait: Duration::from_millis(config.wait_timeout_ms),
            },
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
                backoff_multiplier: config.retry_backoff_multiplier,
            },
            identity: IdentityConfig {
                user_agent: config.user_agent.clone(),
                viewport: Viewport {
                    width: 1366,
                    height: 768,
                },
                locale: "en-US".to_string(),
                timezone: config.default_timezone.clone(),
                rotate: config.rotate_identity,
            },
            stealth: config.stealth,
            max_sessions: config.max_sessions.max(1),
            max_pages: config.max_pages.max(1),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig {
                requests_per_minute: 30,
                burst_size: 3,
                inter_request_delay: Duration::from_secs(1),
            },
            timeouts: TimeoutConfig {
                navigation: Duration::from_secs(30),
                action: Duration::from_secs(10),
                wait: Duration::from_secs(15),
            },
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                backoff_multiplier: 2.0,
            },
            identity: IdentityConfig {
                user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
                viewport: Viewport {
                    width: 1366,
                    height: 768,
                },
                locale: "en-US".to_string(),
                timezone: "UTC".to_string(),
                rotate: true,
            },
            stealth: true,
            max_sessions: 5,
            max_pages: 10,
        }
    }
}

/// Serializes a `Duration` as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_app_config_copies_limits_and_timeouts() {
        let app = AppConfig {
            env: crate::Environment::Test,
            log_level: "debug".to_string(),
            requests_per_minute: 12,
            burst_size: 2,
            inter_request_delay_ms: 250,
            navigation_timeout_ms: 5000,
            action_timeout_ms: 1000,
            wait_timeout_ms: 2000,
            max_retries: 4,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 900,
            retry_backoff_multiplier: 3.0,
            stealth: false,
            rotate_identity: false,
            user_agent: "test-agent/1.0".to_string(),
            max_sessions: 0,
            concurrency: 3,
            chunk_pause_ms: 0,
            max_pages: 0,
            default_timezone: "Europe/Berlin".to_string(),
        };
        let cfg = ScraperConfig::from_app_config(&app);
        assert_eq!(cfg.rate_limit.requests_per_minute, 12);
        assert_eq!(cfg.rate_limit.inter_request_delay, Duration::from_millis(250));
        assert_eq!(cfg.timeouts.navigation, Duration::from_secs(5));
        assert_eq!(cfg.retry.max_retries, 4);
        assert_eq!(cfg.retry.max_delay, Duration::from_millis(900));
        assert_eq!(cfg.identity.user_agent, "test-agent/1.0");
        assert_eq!(cfg.identity.timezone, "Europe/Berlin");
        assert!(!cfg.identity.rotate);
        assert!(!cfg.stealth);
        // Zero bounds are clamped so a scraper can always open a session.
        assert_eq!(cfg.max_sessions, 1);
        assert_eq!(cfg.max_pages, 1);
    }

    #[test]
    fn durations_serialize_as_milliseconds() {
        let json = serde_json::to_value(ScraperConfig::default()).unwrap();
        assert_eq!(json["rate_limit"]["inter_request_delay"], 1000);
        assert_eq!(json["timeouts"]["navigation"], 30_000);
    }
}
