use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::EventCategory;
use crate::target::{FallbackAction, PaginationStrategy, ScrapeTarget};
use crate::ConfigError;

/// Inclusive calendar range applied to an event's UTC start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilters {
    /// Case-insensitive substring matched against venue city, address, or name.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    /// Any-of match; empty means every category.
    #[serde(default)]
    pub categories: Vec<EventCategory>,
}

impl JobFilters {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.date_range.is_none() && self.categories.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Ndjson,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Ndjson => write!(f, "ndjson"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub format: OutputFormat,
    /// File to write; standard output when absent.
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

/// Externally supplied job: which targets to scrape and what to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: Option<String>,
    pub targets: Vec<ScrapeTarget>,
    #[serde(default)]
    pub filters: JobFilters,
    #[serde(default)]
    pub output: OutputSpec,
}

/// Load and validate a job from a YAML (or JSON) file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_job(path: &Path) -> Result<Job, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::JobFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_job(&content)
}

/// Parse and validate a job document.
///
/// # Errors
///
/// Returns `ConfigError::JobFileParse` for malformed documents and
/// `ConfigError::Validation` for well-formed jobs that cannot be run.
pub fn parse_job(content: &str) -> Result<Job, ConfigError> {
    let job: Job = serde_yaml::from_str(content).map_err(ConfigError::JobFileParse)?;
    validate_job(&job)?;
    Ok(job)
}

fn validate_job(job: &Job) -> Result<(), ConfigError> {
    if job.targets.is_empty() {
        return Err(ConfigError::Validation(
            "job must declare at least one target".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for target in &job.targets {
        validate_target(target)?;
        if !seen_ids.insert(target.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate target id: '{}'",
                target.id
            )));
        }
    }

    if let Some(range) = job.filters.date_range {
        if range.start > range.end {
            return Err(ConfigError::Validation(format!(
                "date range start {} is after end {}",
                range.start, range.end
            )));
        }
    }

    Ok(())
}

fn validate_target(target: &ScrapeTarget) -> Result<(), ConfigError> {
    if target.id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "target id must be non-empty".to_string(),
        ));
    }
    if target.source.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "target '{}' has an empty source",
            target.id
        )));
    }

    check_url(&target.id, "base_url", &target.base_url)?;

    if target.selectors.container.trim().is_empty() || target.selectors.item.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "target '{}' needs non-empty container and item selectors",
            target.id
        )));
    }

    if target.max_pages == Some(0) {
        return Err(ConfigError::Validation(format!(
            "target '{}' has max_pages 0; must be at least 1",
            target.id
        )));
    }

    match &target.pagination {
        PaginationStrategy::Button { selector } if selector.trim().is_empty() => {
            return Err(ConfigError::Validation(format!(
                "target '{}' uses button pagination without a selector",
                target.id
            )));
        }
        PaginationStrategy::UrlParameter { param, step, .. } => {
            if param.trim().is_empty() || *step == 0 {
                return Err(ConfigError::Validation(format!(
                    "target '{}' has an invalid url_parameter pagination",
                    target.id
                )));
            }
        }
        _ => {}
    }

    for rule in &target.fallbacks {
        if rule.triggers.is_empty() {
            return Err(ConfigError::Validation(format!(
                "target '{}' has a fallback rule without triggers",
                target.id
            )));
        }
        match &rule.action {
            FallbackAction::DifferentUrl { url } => check_url(&target.id, "fallback url", url)?,
            FallbackAction::AlternativeSelectors { container, item }
                if container.trim().is_empty() || item.trim().is_empty() =>
            {
                return Err(ConfigError::Validation(format!(
                    "target '{}' has an alternative_selectors fallback with empty selectors",
                    target.id
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

fn check_url(target_id: &str, what: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| {
        ConfigError::Validation(format!("target '{target_id}' has an invalid {what} '{raw}': {e}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!(
            "target '{target_id}' {what} must be http(s), got '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}
