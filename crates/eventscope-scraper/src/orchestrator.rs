//! Job orchestration.
//!
//! [`ScraperOrchestrator`] is constructed once per job runner and owns every
//! piece of cross-run state: the per-target rate limiter and circuit
//! breakers, the session registry, and the observers notified as sessions
//! finish. Targets are processed in fixed-size chunks; a chunk is awaited in
//! full before the next starts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventscope_core::{
    AppConfig, Job, JobFilters, NormalizedEvent, NormalizedVenue, RawEventData, ScrapeTarget,
    ScraperConfig,
};
use eventscope_normalize::{
    generate_quality_report, DataQualityReport, EventNormalizer, NormalizedBatch, NormalizerConfig,
};
use futures::future::{join_all, AbortHandle, Abortable};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::EngineError;
use crate::fallback::execute_with_fallbacks;
use crate::metrics::{AggregateMetrics, HealthAlert, HealthStatus, ScrapingMetrics};
use crate::rate_limit::RateLimiter;
use crate::renderer::PageRenderer;
use crate::retry::{RetryContext, RetryExecutor};
use crate::session::{ScrapingSession, SessionStatus, SessionTracker};
use crate::sink::RecordSink;
use crate::target::{ScrapeOutcome, TargetScraper};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Targets scraped at once.
    pub concurrency: usize,
    /// Pause between chunks of targets.
    pub chunk_pause: Duration,
    pub scraper: ScraperConfig,
    pub normalizer: NormalizerConfig,
    pub breaker: CircuitBreakerConfig,
    /// Add random jitter to retry delays.
    pub jitter: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            chunk_pause: Duration::from_secs(2),
            scraper: ScraperConfig::default(),
            normalizer: NormalizerConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            jitter: true,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            chunk_pause: Duration::from_millis(config.chunk_pause_ms),
            scraper: ScraperConfig::from_app_config(config),
            normalizer: NormalizerConfig {
                default_timezone: config.default_timezone.clone(),
                ..NormalizerConfig::default()
            },
            breaker: CircuitBreakerConfig::default(),
            jitter: true,
        }
    }
}

/// Receives session lifecycle notifications, in registration order.
pub trait ScrapeObserver: Send + Sync {
    fn on_session_finished(&self, _session: &ScrapingSession) {}

    fn on_health_alert(&self, _alert: &HealthAlert) {}
}

/// Per-target summary of a job run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetReport {
    pub target_id: String,
    pub source: String,
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub events_found: usize,
    pub events_normalized: usize,
    pub skipped: bool,
    pub fallback_used: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub events: usize,
    pub venues: usize,
    pub organizers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: Option<String>,
    pub targets: Vec<TargetReport>,
    /// Canonical records that passed the job's filters.
    pub records: NormalizedBatch,
    pub quality: DataQualityReport,
    pub metrics: AggregateMetrics,
    pub written: Option<WriteSummary>,
}

struct TargetRun {
    report: TargetReport,
    raw: Vec<RawEventData>,
    normalized: NormalizedBatch,
}

pub struct ScraperOrchestrator {
    renderer: Arc<dyn PageRenderer>,
    config: OrchestratorConfig,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    normalizer: EventNormalizer,
    active: Mutex<HashMap<Uuid, Arc<TargetScraper>>>,
    sessions: Mutex<HashMap<Uuid, SessionTracker>>,
    abort_handles: Mutex<HashMap<Uuid, AbortHandle>>,
    observers: Vec<Arc<dyn ScrapeObserver>>,
}

impl ScraperOrchestrator {
    #[must_use]
    pub fn new(renderer: Arc<dyn PageRenderer>, config: OrchestratorConfig) -> Self {
        Self {
            renderer,
            rate_limiter: Arc::new(RateLimiter::new(config.scraper.rate_limit.clone())),
            breakers: Arc::new(CircuitBreakerRegistry::new(config.breaker.clone())),
            normalizer: EventNormalizer::new(config.normalizer.clone()),
            config,
            active: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            abort_handles: Mutex::new(HashMap::new()),
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ScrapeObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Scrapes every target in `job`, normalizes and filters the results,
    /// and writes them to `sink` when one is given.
    ///
    /// Failing targets degrade the result set instead of failing the job;
    /// their errors are in the per-target reports and session records.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sink`] if writing to `sink` fails.
    pub async fn run_job(
        &self,
        job: &Job,
        sink: Option<&dyn RecordSink>,
    ) -> Result<JobReport, EngineError> {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!(
            job_id = job.id.as_deref().unwrap_or("-"),
            targets = job.targets.len(),
            concurrency,
            "starting job"
        );

        let mut runs: Vec<TargetRun> = Vec::with_capacity(job.targets.len());
        for (index, chunk) in job.targets.chunks(concurrency).enumerate() {
            if index > 0 && !self.config.chunk_pause.is_zero() {
                tokio::time::sleep(self.config.chunk_pause).await;
            }
            let chunk_runs = join_all(
                chunk
                    .iter()
                    .map(|target| self.run_target(job.id.clone(), target)),
            )
            .await;
            runs.extend(chunk_runs);
        }

        let raw: Vec<RawEventData> = runs.iter().flat_map(|r| r.raw.iter().cloned()).collect();
        let merged = merge_batches(runs.iter().map(|r| &r.normalized));
        let skipped: Vec<String> = runs
            .iter()
            .filter(|r| r.report.skipped)
            .map(|r| r.report.source.clone())
            .collect();
        let quality = generate_quality_report(&raw, &merged.events).with_skipped_sources(skipped);
        let records = apply_filters(merged, &job.filters);

        let written = match sink {
            Some(sink) => Some(WriteSummary {
                events: sink.upsert_events(&records.events).await?,
                venues: sink.upsert_venues(&records.venues).await?,
                organizers: sink.upsert_organizers(&records.organizers).await?,
            }),
            None => None,
        };

        let targets: Vec<TargetReport> = runs.into_iter().map(|r| r.report).collect();
        let session_metrics = {
            let mut metrics = Vec::with_capacity(targets.len());
            let sessions = self.sessions.lock().await;
            for report in &targets {
                if let Some(tracker) = sessions.get(&report.session_id) {
                    metrics.push(tracker.metrics().await);
                }
            }
            metrics
        };

        tracing::info!(
            job_id = job.id.as_deref().unwrap_or("-"),
            events = records.events.len(),
            venues = records.venues.len(),
            quality_score = quality.quality_score,
            "job finished"
        );

        Ok(JobReport {
            job_id: job.id.clone(),
            targets,
            records,
            quality,
            metrics: AggregateMetrics::from_sessions(&session_metrics),
            written,
        })
    }

    async fn run_target(&self, job_id: Option<String>, target: &ScrapeTarget) -> TargetRun {
        let tracker = SessionTracker::new(ScrapingSession::new(job_id, &target.id, &target.source));
        let session_id = tracker.id();
        self.sessions.lock().await.insert(session_id, tracker.clone());

        if let Some(retry_after) = self.breakers.is_open(&target.id).await {
            let err = EngineError::CircuitBreakerTripped {
                target_id: target.id.clone(),
                retry_after,
            };
            tracing::warn!(
                target_id = %target.id,
                session_id = %session_id,
                error = %err,
                "skipping target"
            );
            tracker.fail(err.to_string()).await;
            self.finish(&tracker, &target.id).await;
            return TargetRun {
                report: report_for(
                    target,
                    session_id,
                    SessionStatus::Failed,
                    None,
                    0,
                    Some(err.to_string()),
                ),
                raw: Vec::new(),
                normalized: NormalizedBatch::default(),
            };
        }

        tracker.start().await;
        tracing::info!(target_id = %target.id, session_id = %session_id, "session started");
        let scraper = Arc::new(TargetScraper::new(
            Arc::clone(&self.renderer),
            self.config.scraper.clone(),
            Arc::clone(&self.rate_limiter),
            &target.id,
        ));
        self.active.lock().await.insert(session_id, Arc::clone(&scraper));
        let (abort_handle, registration) = AbortHandle::new_pair();
        self.abort_handles.lock().await.insert(session_id, abort_handle);

        let executor = RetryExecutor::new(
            self.config.scraper.retry.clone(),
            Arc::clone(&self.breakers),
        )
        .with_jitter(self.config.jitter);
        let work = execute_with_fallbacks(&target.fallbacks, target, |candidate: ScrapeTarget| {
            let scraper = Arc::clone(&scraper);
            let executor = executor.clone();
            let tracker = tracker.clone();
            let breaker_id = target.id.clone();
            async move {
                let mut context = RetryContext::default();
                executor
                    .execute_with_retry(
                        &breaker_id,
                        |ctx| {
                            let scraper = Arc::clone(&scraper);
                            let candidate = candidate.clone();
                            let tracker = tracker.clone();
                            async move { scraper.scrape(&candidate, &ctx, Some(&tracker)).await }
                        },
                        &mut context,
                    )
                    .await
            }
        });
        let result = match Abortable::new(work, registration).await {
            Ok(result) => result,
            Err(_aborted) => Err(EngineError::Cancelled {
                session_id: session_id.to_string(),
            }),
        };

        let run = match result {
            Ok(outcome) => self.complete_target(target, &tracker, outcome).await,
            Err(err) => {
                if matches!(err, EngineError::Cancelled { .. }) {
                    tracker.cancel().await;
                    tracing::info!(
                        target_id = %target.id,
                        session_id = %session_id,
                        "session cancelled"
                    );
                } else {
                    tracing::error!(
                        target_id = %target.id,
                        session_id = %session_id,
                        error = %err,
                        "target failed"
                    );
                    tracker.fail(err.to_string()).await;
                }
                let status = tracker.status().await;
                TargetRun {
                    report: report_for(target, session_id, status, None, 0, Some(err.to_string())),
                    raw: Vec::new(),
                    normalized: NormalizedBatch::default(),
                }
            }
        };

        self.abort_handles.lock().await.remove(&session_id);
        scraper.shutdown().await;
        self.active.lock().await.remove(&session_id);
        self.finish(&tracker, &target.id).await;
        run
    }

    async fn complete_target(
        &self,
        target: &ScrapeTarget,
        tracker: &SessionTracker,
        outcome: ScrapeOutcome,
    ) -> TargetRun {
        let normalized = self.normalizer.normalize_batch(&outcome.events);
        tracker.record_processed(normalized.events.len()).await;
        tracker
            .record_outcome(outcome.skipped, outcome.fallback_used.clone())
            .await;
        tracker.complete().await;
        let status = tracker.status().await;
        tracing::info!(
            target_id = %target.id,
            session_id = %tracker.id(),
            events = outcome.events.len(),
            normalized = normalized.events.len(),
            skipped = outcome.skipped,
            "session completed"
        );
        let mut report = report_for(
            target,
            tracker.id(),
            status,
            outcome.fallback_used.clone(),
            outcome.events.len(),
            None,
        );
        report.skipped = outcome.skipped;
        report.events_normalized = normalized.events.len();
        TargetRun {
            report,
            raw: outcome.events,
            normalized,
        }
    }

    async fn finish(&self, tracker: &SessionTracker, target_id: &str) {
        let session = tracker.snapshot().await;
        for observer in &self.observers {
            observer.on_session_finished(&session);
        }
        if let Some(retry_after) = self.breakers.is_open(target_id).await {
            let alert = HealthAlert {
                target_id: target_id.to_string(),
                message: format!(
                    "circuit breaker open; next attempt in {}s",
                    retry_after.as_secs()
                ),
                raised_at: Utc::now(),
            };
            for observer in &self.observers {
                observer.on_health_alert(&alert);
            }
        }
    }

    /// Aborts an in-flight session. Returns `false` if `session_id` is not
    /// running.
    pub async fn cancel_session(&self, session_id: Uuid) -> bool {
        let handle = self.abort_handles.lock().await.remove(&session_id);
        let Some(handle) = handle else {
            return false;
        };
        handle.abort();
        if let Some(tracker) = self.sessions.lock().await.get(&session_id) {
            tracker.cancel().await;
        }
        tracing::info!(session_id = %session_id, "cancellation requested");
        true
    }

    pub async fn session(&self, session_id: Uuid) -> Option<ScrapingSession> {
        let tracker = self.sessions.lock().await.get(&session_id).cloned()?;
        Some(tracker.snapshot().await)
    }

    /// All sessions this orchestrator has run, oldest first.
    pub async fn sessions(&self) -> Vec<ScrapingSession> {
        let trackers: Vec<SessionTracker> =
            self.sessions.lock().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(trackers.len());
        for tracker in trackers {
            sessions.push(tracker.snapshot().await);
        }
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Forgets completed, failed and cancelled sessions and returns how many
    /// were dropped. Running sessions are kept.
    pub async fn clear_finished(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut finished = Vec::new();
        for (id, tracker) in sessions.iter() {
            if tracker.status().await.is_terminal() {
                finished.push(*id);
            }
        }
        for id in &finished {
            sessions.remove(id);
        }
        if !finished.is_empty() {
            tracing::debug!(cleared = finished.len(), "finished sessions cleared");
        }
        finished.len()
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        let mut issues: Vec<String> = self
            .breakers
            .open_targets()
            .await
            .into_iter()
            .map(|id| format!("{id}: circuit breaker open"))
            .collect();
        let scrapers: Vec<Arc<TargetScraper>> =
            self.active.lock().await.values().cloned().collect();
        for scraper in scrapers {
            issues.extend(scraper.session_manager().health_check().await.issues);
        }
        HealthStatus::from_issues(issues)
    }

    pub async fn get_metrics(&self) -> Vec<ScrapingMetrics> {
        self.sessions()
            .await
            .iter()
            .map(ScrapingSession::metrics)
            .collect()
    }

    pub async fn aggregate_metrics(&self) -> AggregateMetrics {
        AggregateMetrics::from_sessions(&self.get_metrics().await)
    }

    /// Aborts everything still running and releases renderer resources.
    pub async fn shutdown(&self) {
        let handles: Vec<AbortHandle> = self
            .abort_handles
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.abort();
        }
        let scrapers: Vec<Arc<TargetScraper>> =
            self.active.lock().await.drain().map(|(_, s)| s).collect();
        for scraper in scrapers {
            scraper.shutdown().await;
        }
        tracing::info!("orchestrator shut down");
    }
}

fn report_for(
    target: &ScrapeTarget,
    session_id: Uuid,
    status: SessionStatus,
    fallback_used: Option<String>,
    events_found: usize,
    error: Option<String>,
) -> TargetReport {
    TargetReport {
        target_id: target.id.clone(),
        source: target.source.clone(),
        session_id,
        status,
        events_found,
        events_normalized: 0,
        skipped: false,
        fallback_used,
        error,
    }
}

/// Concatenates batches, keeping the first record per `(external_id, source)`.
fn merge_batches<'a>(batches: impl Iterator<Item = &'a NormalizedBatch>) -> NormalizedBatch {
    let mut merged = NormalizedBatch::default();
    let mut events = HashSet::new();
    let mut venues = HashSet::new();
    let mut organizers = HashSet::new();
    for batch in batches {
        for e in &batch.events {
            if events.insert((e.external_id.clone(), e.source.clone())) {
                merged.events.push(e.clone());
            }
        }
        for v in &batch.venues {
            if venues.insert((v.external_id.clone(), v.source.clone())) {
                merged.venues.push(v.clone());
            }
        }
        for o in &batch.organizers {
            if organizers.insert((o.external_id.clone(), o.source.clone())) {
                merged.organizers.push(o.clone());
            }
        }
    }
    merged
}

/// Keeps events matching every filter, then the venues and organizers those
/// events reference.
#[must_use]
pub fn apply_filters(batch: NormalizedBatch, filters: &JobFilters) -> NormalizedBatch {
    if filters.is_empty() {
        return batch;
    }
    let venues_by_id: HashMap<&str, &NormalizedVenue> = batch
        .venues
        .iter()
        .map(|v| (v.external_id.as_str(), v))
        .collect();
    let location = filters
        .location
        .as_deref()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty());

    let events: Vec<NormalizedEvent> = batch
        .events
        .iter()
        .filter(|e| {
            filters
                .date_range
                .as_ref()
                .map_or(true, |range| range.contains(e.start_time.date_naive()))
        })
        .filter(|e| filters.categories.is_empty() || filters.categories.contains(&e.category))
        .filter(|e| {
            location.as_deref().map_or(true, |needle| {
                let venue = e
                    .venue_external_id
                    .as_deref()
                    .and_then(|id| venues_by_id.get(id));
                let mut haystacks = vec![e.venue_name.to_lowercase()];
                if let Some(venue) = venue {
                    haystacks.extend(
                        [&venue.city, &venue.address, &venue.region]
                            .into_iter()
                            .flatten()
                            .map(|s| s.to_lowercase()),
                    );
                }
                haystacks.iter().any(|h| h.contains(needle))
            })
        })
        .cloned()
        .collect();

    let venue_ids: HashSet<(&str, &str)> = events
        .iter()
        .filter_map(|e| e.venue_external_id.as_deref().map(|id| (id, e.source.as_str())))
        .collect();
    let organizer_names: HashSet<(String, &str)> = events
        .iter()
        .filter_map(|e| {
            e.organizer_name
                .as_deref()
                .map(|n| (n.to_lowercase(), e.source.as_str()))
        })
        .collect();

    let venues = batch
        .venues
        .iter()
        .filter(|v| venue_ids.contains(&(v.external_id.as_str(), v.source.as_str())))
        .cloned()
        .collect();
    let organizers = batch
        .organizers
        .iter()
        .filter(|o| organizer_names.contains(&(o.name.to_lowercase(), o.source.as_str())))
        .cloned()
        .collect();

    NormalizedBatch {
        events,
        venues,
        organizers,
    }
}
