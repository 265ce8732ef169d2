//! Shared domain types and configuration for eventscope.
//!
//! Everything here is plain data: scraper settings, target descriptions,
//! job input, and the raw/canonical record shapes that flow between the
//! scraping engine and the normalizer.

pub mod app_config;
pub mod config;
pub mod job;
pub mod records;
pub mod scraper_config;
pub mod target;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use job::{load_job, parse_job, DateRange, Job, JobFilters, OutputFormat, OutputSpec};
pub use records::{
    EventCategory, NormalizedEvent, NormalizedOrganizer, NormalizedVenue, RawEventData,
    RawOrganizerData, RawVenueData,
};
pub use scraper_config::{
    IdentityConfig, RateLimitConfig, RetryPolicy, ScraperConfig, TimeoutConfig, Viewport,
};
pub use target::{
    AuthConfig, CookieConsent, FallbackAction, FallbackRule, FallbackTrigger, PaginationStrategy,
    ScrapeTarget, SelectorMap,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read job file {path}: {source}")]
    JobFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse job file: {0}")]
    JobFileParse(#[source] serde_yaml::Error),

    #[error("invalid job: {0}")]
    Validation(String),
}
