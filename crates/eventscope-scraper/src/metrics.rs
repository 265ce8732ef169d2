//! Health and metrics surfaces exposed by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Counters for one scraping session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingMetrics {
    pub session_id: Uuid,
    pub target_id: String,
    pub source: String,
    pub events_scraped: u64,
    pub venues_scraped: u64,
    pub pages_scraped: u64,
    pub error_count: u64,
    pub requests_attempted: u64,
    pub requests_failed: u64,
    /// Share of attempted requests that succeeded; 0.0 when none were made.
    pub success_rate: f64,
    pub blocked_count: u64,
    pub rate_limited_count: u64,
    pub captcha_count: u64,
    pub duration_ms: u64,
}

/// Totals across sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub sessions: usize,
    pub events_scraped: u64,
    pub venues_scraped: u64,
    pub pages_scraped: u64,
    pub error_count: u64,
    pub requests_attempted: u64,
    pub requests_failed: u64,
    /// Request-weighted success rate across all sessions.
    pub success_rate: f64,
    pub blocked_count: u64,
    pub rate_limited_count: u64,
    pub captcha_count: u64,
    pub total_duration_ms: u64,
}

impl AggregateMetrics {
    #[must_use]
    pub fn from_sessions(metrics: &[ScrapingMetrics]) -> Self {
        let mut total = metrics.iter().fold(
            AggregateMetrics {
                sessions: metrics.len(),
                ..AggregateMetrics::default()
            },
            |mut acc, m| {
                acc.events_scraped += m.events_scraped;
                acc.venues_scraped += m.venues_scraped;
                acc.pages_scraped += m.pages_scraped;
                acc.error_count += m.error_count;
                acc.requests_attempted += m.requests_attempted;
                acc.requests_failed += m.requests_failed;
                acc.blocked_count += m.blocked_count;
                acc.rate_limited_count += m.rate_limited_count;
                acc.captcha_count += m.captcha_count;
                acc.total_duration_ms += m.duration_ms;
                acc
            },
        );
        total.success_rate = success_rate(total.requests_attempted, total.requests_failed);
        total
    }
}

#[must_use]
pub fn success_rate(attempted: u64, failed: u64) -> f64 {
    if attempted == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let rate = attempted.saturating_sub(failed) as f64 / attempted as f64;
    rate
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub issues: Vec<String>,
}

impl HealthStatus {
    #[must_use]
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self {
            healthy: issues.is_empty(),
            issues,
        }
    }
}

/// Raised to observers when a target's circuit breaker is open after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub target_id: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}
