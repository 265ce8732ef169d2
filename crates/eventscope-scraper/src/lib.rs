//! Resilient scraping engine for event listings.
//!
//! A job's targets are scraped through a [`PageRenderer`] with per-target
//! rate limiting, classified retries, circuit breakers and fallback rules;
//! the raw results are normalized and handed to a [`RecordSink`].

pub mod challenge;
pub mod circuit_breaker;
pub mod classify;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod identity;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limit;
pub mod renderer;
pub mod retry;
pub mod session;
pub mod session_manager;
pub mod sink;
pub mod static_renderer;
pub mod target;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitStatus};
pub use classify::{classify, Classification, RecoveryAction};
pub use error::{EngineError, ErrorKind, ScrapingError, Severity};
pub use fallback::execute_with_fallbacks;
pub use metrics::{AggregateMetrics, HealthAlert, HealthStatus, ScrapingMetrics};
pub use orchestrator::{
    apply_filters, JobReport, OrchestratorConfig, ScrapeObserver, ScraperOrchestrator,
    TargetReport, WriteSummary,
};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use renderer::{
    ElementSnapshot, PageRenderer, RendererBrowser, RendererContext, RendererPage, RouteDecision,
    RouteHandler,
};
pub use retry::{RetryContext, RetryExecutor};
pub use session::{ScrapingSession, SessionStatus, SessionTracker};
pub use session_manager::SessionManager;
pub use sink::{MemorySink, RecordSink, SinkError};
pub use static_renderer::StaticRenderer;
pub use target::{ScrapeOutcome, TargetScraper};
