//! Scrape target descriptions supplied by job configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field names recognised in [`SelectorMap::fields`].
pub mod fields {
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const DATE: &str = "date";
    pub const TIME: &str = "time";
    pub const END_DATE: &str = "end_date";
    pub const END_TIME: &str = "end_time";
    pub const VENUE: &str = "venue";
    pub const VENUE_ADDRESS: &str = "venue_address";
    pub const VENUE_CITY: &str = "venue_city";
    pub const ORGANIZER: &str = "organizer";
    pub const PRICE: &str = "price";
    pub const URL: &str = "url";
    pub const TICKET_URL: &str = "ticket_url";
    pub const IMAGE: &str = "image";
    pub const CATEGORY: &str = "category";
    pub const EXTERNAL_ID: &str = "external_id";
}

/// CSS selectors used to pull records out of a rendered listing page.
///
/// Field selectors are evaluated relative to each item. A selector may end in
/// `@attr` to read an attribute instead of text, e.g. `"a.more@href"`. An
/// empty selector before `@` reads the attribute from the item itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorMap {
    pub container: String,
    pub item: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Substitute container selectors tried in order when `container` is absent.
    #[serde(default)]
    pub fallback_containers: Vec<String>,
}

impl SelectorMap {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// How to reach page N+1 of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaginationStrategy {
    #[default]
    None,
    /// Click a "next"/"load more" control.
    Button { selector: String },
    /// Scroll to the bottom and wait for more items to load.
    InfiniteScroll,
    /// Rewrite a query parameter, e.g. `?page=2`.
    UrlParameter {
        param: String,
        #[serde(default = "default_first_page")]
        start: u32,
        #[serde(default = "default_page_step")]
        step: u32,
    },
}

fn default_first_page() -> u32 {
    1
}

fn default_page_step() -> u32 {
    1
}

/// Form login performed before scraping.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub login_url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("login_url", &self.login_url)
            .field("username_selector", &self.username_selector)
            .field("password_selector", &self.password_selector)
            .field("submit_selector", &self.submit_selector)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Cookie banner dismissal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieConsent {
    pub accept_selector: String,
    /// How long to wait for the banner before assuming there is none.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Classified failure shapes that can trigger a fallback rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTrigger {
    RateLimited,
    Blocked,
    EmptyResults,
    GenericError,
}

/// Recovery step executed when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackAction {
    WaitAndRetry {
        delay_ms: u64,
        #[serde(default = "default_fallback_retries")]
        max_retries: u32,
    },
    DifferentUrl {
        url: String,
    },
    AlternativeSelectors {
        container: String,
        item: String,
    },
    Skip,
}

fn default_fallback_retries() -> u32 {
    1
}

impl FallbackAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            FallbackAction::WaitAndRetry { .. } => "wait_and_retry",
            FallbackAction::DifferentUrl { .. } => "different_url",
            FallbackAction::AlternativeSelectors { .. } => "alternative_selectors",
            FallbackAction::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub triggers: Vec<FallbackTrigger>,
    pub action: FallbackAction,
}

/// A named source endpoint. Read-only while it is being scraped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub id: String,
    /// Source identifier stamped on every record, e.g. `"eventbrite"`.
    pub source: String,
    pub base_url: String,
    pub selectors: SelectorMap,
    #[serde(default)]
    pub pagination: PaginationStrategy,
    /// Overrides `ScraperConfig::max_pages` for this target.
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub cookie_consent: Option<CookieConsent>,
    /// IANA timezone for listings that print local times without an offset.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<FallbackRule>,
}

impl ScrapeTarget {
    /// Effective page bound for this target.
    #[must_use]
    pub fn page_limit(&self, default_max_pages: u32) -> u32 {
        self.max_pages.unwrap_or(default_max_pages).max(1)
    }

    /// Returns a copy pointed at a different endpoint for the same source.
    #[must_use]
    pub fn with_base_url(&self, url: &str) -> Self {
        Self {
            base_url: url.to_string(),
            ..self.clone()
        }
    }

    /// Returns a copy with substituted container and item selectors.
    #[must_use]
    pub fn with_selectors(&self, container: &str, item: &str) -> Self {
        let mut next = self.clone();
        next.selectors.container = container.to_string();
        next.selectors.item = item.to_string();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_yaml() -> &'static str {
        r#"
id: city-events
source: cityguide
base_url: https://example.com/events
selectors:
  container: ".event-list"
  item: ".event"
  fields:
    title: "h2"
    date: "time@datetime"
pagination:
  type: url_parameter
  param: page
fallbacks:
  - triggers: [rate_limited]
    action:
      type: wait_and_retry
      delay_ms: 5000
  - triggers: [empty_results, blocked]
    action:
      type: different_url
      url: https://m.example.com/events
"#
    }

    #[test]
    fn deserializes_target_with_defaults() {
        let target: ScrapeTarget = serde_yaml::from_str(target_yaml()).unwrap();
        assert_eq!(target.id, "city-events");
        assert_eq!(target.selectors.field("date"), Some("time@datetime"));
        assert_eq!(
            target.pagination,
            PaginationStrategy::UrlParameter {
                param: "page".to_string(),
                start: 1,
                step: 1
            }
        );
        assert!(target.cookie_consent.is_none());
        assert_eq!(target.fallbacks.len(), 2);
        assert_eq!(
            target.fallbacks[0].action,
            FallbackAction::WaitAndRetry {
                delay_ms: 5000,
                max_retries: 1
            }
        );
        assert_eq!(
            target.fallbacks[1].triggers,
            vec![FallbackTrigger::EmptyResults, FallbackTrigger::Blocked]
        );
    }

    #[test]
    fn blank_field_selector_is_treated_as_absent() {
        let mut target: ScrapeTarget = serde_yaml::from_str(target_yaml()).unwrap();
        target
            .selectors
            .fields
            .insert("price".to_string(), "  ".to_string());
        assert_eq!(target.selectors.field("price"), None);
    }

    #[test]
    fn page_limit_prefers_target_override() {
        let mut target: ScrapeTarget = serde_yaml::from_str(target_yaml()).unwrap();
        assert_eq!(target.page_limit(7), 7);
        target.max_pages = Some(2);
        assert_eq!(target.page_limit(7), 2);
        target.max_pages = Some(0);
        assert_eq!(target.page_limit(7), 1);
    }

    #[test]
    fn auth_debug_redacts_password() {
        let auth = AuthConfig {
            login_url: "https://example.com/login".to_string(),
            username_selector: "#user".to_string(),
            password_selector: "#pass".to_string(),
            submit_selector: "button".to_string(),
            username: "scraper".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[redacted]"));
    }

    #[test]
    fn with_selectors_keeps_fields() {
        let target: ScrapeTarget = serde_yaml::from_str(target_yaml()).unwrap();
        let alt = target.with_selectors("#list", "li");
        assert_eq!(alt.selectors.container, "#list");
        assert_eq!(alt.selectors.item, "li");
        assert_eq!(alt.selectors.fields, target.selectors.fields);
    }
}
