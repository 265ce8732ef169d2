//! Scraping session records.
//!
//! A [`ScrapingSession`] describes one run against one target. It moves
//! `pending -> running -> {completed | failed | cancelled}` and is frozen once
//! it reaches a terminal status; late updates from an abandoned run are
//! ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ErrorKind, ScrapingError};
use crate::metrics::{success_rate, ScrapingMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub pages_scraped: u64,
    pub events_found: u64,
    /// Events that survived normalization.
    pub events_processed: u64,
    pub venues_found: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingSession {
    pub id: Uuid,
    pub job_id: Option<String>,
    pub target_id: String,
    pub source: String,
    pub status: SessionStatus,
    pub progress: SessionProgress,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub errors: Vec<ScrapingError>,
    /// Terminal failure summary for failed sessions.
    pub failure: Option<String>,
    /// A fallback rule skipped the target.
    pub skipped: bool,
    pub fallback_used: Option<String>,
    pub requests_attempted: u64,
    pub requests_failed: u64,
}

impl ScrapingSession {
    #[must_use]
    pub fn new(job_id: Option<String>, target_id: &str, source: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            target_id: target_id.to_string(),
            source: source.to_string(),
            status: SessionStatus::Pending,
            progress: SessionProgress::default(),
            started_at: None,
            finished_at: None,
            errors: Vec::new(),
            failure: None,
            skipped: false,
            fallback_used: None,
            requests_attempted: 0,
            requests_failed: 0,
        }
    }

    /// `pending -> running`. Returns whether the transition applied.
    pub fn start(&mut self) -> bool {
        if self.status != SessionStatus::Pending {
            return false;
        }
        self.status = SessionStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn complete(&mut self) -> bool {
        if self.status != SessionStatus::Running {
            return false;
        }
        self.finish(SessionStatus::Completed);
        true
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.failure = Some(reason.into());
        self.finish(SessionStatus::Failed);
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.finish(SessionStatus::Cancelled);
        true
    }

    fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.finished_at = Some(now);
    }

    #[must_use]
    pub fn metrics(&self) -> ScrapingMetrics {
        let count_kind =
            |kind: ErrorKind| self.errors.iter().filter(|e| e.kind == kind).count() as u64;
        let duration_ms = self.started_at.map_or(0, |start| {
            let end = self.finished_at.unwrap_or_else(Utc::now);
            u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
        });
        ScrapingMetrics {
            session_id: self.id,
            target_id: self.target_id.clone(),
            source: self.source.clone(),
            events_scraped: self.progress.events_found,
            venues_scraped: self.progress.venues_found,
            pages_scraped: self.progress.pages_scraped,
            error_count: self.progress.errors,
            requests_attempted: self.requests_attempted,
            requests_failed: self.requests_failed,
            success_rate: success_rate(self.requests_attempted, self.requests_failed),
            blocked_count: count_kind(ErrorKind::Blocked),
            rate_limited_count: count_kind(ErrorKind::RateLimit),
            captcha_count: count_kind(ErrorKind::Captcha),
            duration_ms,
        }
    }
}

/// Shared handle the target scraper writes progress through while the
/// orchestrator holds the same session for status queries.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    id: Uuid,
    inner: Arc<Mutex<ScrapingSession>>,
}

impl SessionTracker {
    #[must_use]
    pub fn new(session: ScrapingSession) -> Self {
        Self {
            id: session.id,
            inner: Arc::new(Mutex::new(session)),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn snapshot(&self) -> ScrapingSession {
        self.inner.lock().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.lock().await.status
    }

    pub async fn start(&self) -> bool {
        self.inner.lock().await.start()
    }

    pub async fn complete(&self) -> bool {
        self.inner.lock().await.complete()
    }

    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        self.inner.lock().await.fail(reason)
    }

    pub async fn cancel(&self) -> bool {
        self.inner.lock().await.cancel()
    }

    /// Applies `update` unless the session is already terminal.
    async fn update(&self, update: impl FnOnce(&mut ScrapingSession)) {
        let mut session = self.inner.lock().await;
        if !session.status.is_terminal() {
            update(&mut session);
        }
    }

    pub async fn record_request(&self, succeeded: bool) {
        self.update(|s| {
            s.requests_attempted += 1;
            if !succeeded {
                s.requests_failed += 1;
            }
        })
        .await;
    }

    pub async fn record_page(&self, events_found: usize) {
        self.update(|s| {
            s.progress.pages_scraped += 1;
            s.progress.events_found += events_found as u64;
        })
        .await;
    }

    pub async fn record_venues(&self, venues_found: usize) {
        self.update(|s| s.progress.venues_found = venues_found as u64).await;
    }

    pub async fn record_processed(&self, events_processed: usize) {
        self.update(|s| s.progress.events_processed += events_processed as u64)
            .await;
    }

    pub async fn record_error(&self, error: &ScrapingError) {
        self.update(|s| {
            s.progress.errors += 1;
            s.errors.push(error.clone());
        })
        .await;
    }

    pub async fn record_outcome(&self, skipped: bool, fallback_used: Option<String>) {
        self.update(|s| {
            s.skipped = skipped;
            s.fallback_used = fallback_used;
        })
        .await;
    }

    pub async fn metrics(&self) -> ScrapingMetrics {
        self.inner.lock().await.metrics()
    }
}
