#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Process-wide settings read once at startup.
///
/// Scraper-specific values are copied into an immutable
/// [`crate::ScraperConfig`] when a scraper is constructed; nothing reads
/// `AppConfig` after that point.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub requests_per_minute: u32,
    pub burst_size: u32,
    pub inter_request_delay_ms: u64,
    pub navigation_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub wait_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub stealth: bool,
    pub rotate_identity: bool,
    pub user_agent: String,
    pub max_sessions: usize,
    pub concurrency: usize,
    pub chunk_pause_ms: u64,
    pub max_pages: u32,
    pub default_timezone: String,
}
