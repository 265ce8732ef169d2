//! Selector-driven listing scraper.
//!
//! One [`TargetScraper`] serves one target for the duration of a run: it
//! owns that target's renderer sessions, walks the listing's pages, and
//! returns raw records for the normalizer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventscope_core::{
    AuthConfig, PaginationStrategy, RawEventData, RawVenueData, ScrapeTarget, ScraperConfig,
    SelectorMap,
};
use serde::Serialize;
use url::Url;

use crate::challenge::detect_challenge;
use crate::error::{error_for_status, ErrorKind, ScrapingError};
use crate::extract::{extract_event, unique_venues, CompiledSelectors};
use crate::rate_limit::RateLimiter;
use crate::renderer::{ElementSnapshot, NavigationOptions, PageRenderer};
use crate::retry::RetryContext;
use crate::session::SessionTracker;
use crate::session_manager::{SessionHandle, SessionManager};

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Records produced by one scrape of one target.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScrapeOutcome {
    pub target_id: String,
    pub source: String,
    pub events: Vec<RawEventData>,
    /// Unique venues referenced by `events`.
    pub venues: Vec<RawVenueData>,
    pub pages_scraped: u32,
    /// A fallback rule skipped the target; the empty result is deliberate.
    pub skipped: bool,
    /// Name of the fallback action that produced this outcome, if any.
    pub fallback_used: Option<String>,
    /// Items and later pages that failed without failing the scrape.
    pub errors: Vec<ScrapingError>,
}

impl ScrapeOutcome {
    #[must_use]
    pub fn skipped(target: &ScrapeTarget) -> Self {
        Self {
            target_id: target.id.clone(),
            source: target.source.clone(),
            skipped: true,
            fallback_used: Some("skip".to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub struct TargetScraper {
    sessions: SessionManager,
    config: ScraperConfig,
}

impl TargetScraper {
    #[must_use]
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        config: ScraperConfig,
        rate_limiter: Arc<RateLimiter>,
        target_id: &str,
    ) -> Self {
        Self {
            sessions: SessionManager::new(renderer, config.clone(), rate_limiter, target_id),
            config,
        }
    }

    #[must_use]
    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    /// Scrapes `target` once.
    ///
    /// `context` carries recovery hints from earlier attempts: a fresh
    /// session is opened when it asks for identity rotation or
    /// re-authentication, and timeouts are scaled by its multiplier.
    ///
    /// # Errors
    ///
    /// Fails when the first page cannot be loaded or has no listing
    /// container. Failures on later pages end pagination and are reported in
    /// [`ScrapeOutcome::errors`] instead.
    pub async fn scrape(
        &self,
        target: &ScrapeTarget,
        context: &RetryContext,
        tracker: Option<&SessionTracker>,
    ) -> Result<ScrapeOutcome, ScrapingError> {
        let fresh = context.rotate_identity || context.refresh_auth;
        let result = match self.sessions.acquire(fresh).await {
            Ok(handle) => {
                let result = self.run(&handle, target, context, tracker).await;
                if let Err(e) = &result {
                    if matches!(e.kind, ErrorKind::Blocked | ErrorKind::Captcha | ErrorKind::Auth) {
                        self.sessions.destroy_session(handle.id).await;
                    }
                }
                result
            }
            Err(e) => Err(e),
        };
        if let (Err(e), Some(tracker)) = (&result, tracker) {
            tracker.record_error(e).await;
        }
        result
    }

    /// Releases every renderer resource this scraper holds.
    pub async fn shutdown(&self) {
        self.sessions.close_all().await;
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        &self,
        handle: &SessionHandle,
        target: &ScrapeTarget,
        context: &RetryContext,
        tracker: Option<&SessionTracker>,
    ) -> Result<ScrapeOutcome, ScrapingError> {
        let selectors = CompiledSelectors::compile(&target.selectors)?;
        let listing_selector = |container: &str| format!("{container} {}", target.selectors.item);

        if let Some(auth) = &target.auth {
            if context.refresh_auth || !handle.is_authenticated() {
                self.login(handle, auth, context, tracker).await?;
                handle.mark_authenticated();
            }
        }

        self.navigate(handle, &target.base_url, context, tracker).await?;
        self.dismiss_cookie_banner(handle, target).await;

        let scraped_at = Utc::now();
        let page_limit = target.page_limit(self.config.max_pages);
        let mut outcome = ScrapeOutcome {
            target_id: target.id.clone(),
            source: target.source.clone(),
            ..ScrapeOutcome::default()
        };
        let mut seen_items = 0usize;

        for page_index in 0..page_limit {
            if page_index > 0 {
                tokio::time::sleep(self.config.rate_limit.inter_request_delay + context.extra_delay)
                    .await;
                match self.advance(handle, target, page_index, context, tracker).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        self.page_failed(&mut outcome, target, page_index, e, tracker).await;
                        break;
                    }
                }
            }

            let container = match self.resolve_container(handle, &target.selectors, context).await {
                Ok(Some(container)) => container,
                Ok(None) if page_index == 0 => {
                    return Err(ScrapingError::parsing(format!(
                        "no listing container matched on {}",
                        handle.page.url()
                    ))
                    .with_selector(&target.selectors.container)
                    .with_url(handle.page.url()));
                }
                Ok(None) => {
                    tracing::debug!(
                        target_id = %target.id,
                        page = page_index + 1,
                        "listing container gone; end of pages"
                    );
                    break;
                }
                Err(e) if page_index == 0 => return Err(e),
                Err(e) => {
                    self.page_failed(&mut outcome, target, page_index, e, tracker).await;
                    break;
                }
            };

            let items = match handle.page.query_selector_all(&listing_selector(&container)).await {
                Ok(items) => items,
                Err(e) if page_index == 0 => return Err(e),
                Err(e) => {
                    self.page_failed(&mut outcome, target, page_index, e, tracker).await;
                    break;
                }
            };
            let fresh_items: &[ElementSnapshot] = match target.pagination {
                PaginationStrategy::InfiniteScroll => items.get(seen_items..).unwrap_or_default(),
                _ => &items,
            };
            if page_index > 0 && fresh_items.is_empty() {
                break;
            }
            seen_items = items.len();

            let page_url = handle.page.url();
            let before = outcome.events.len();
            for item in fresh_items {
                match extract_event(item, &selectors, target, &page_url, scraped_at) {
                    Ok(event) => outcome.events.push(event),
                    Err(e) => {
                        tracing::warn!(
                            target_id = %target.id,
                            page = page_index + 1,
                            error = %e,
                            "skipping listing item"
                        );
                        if let Some(tracker) = tracker {
                            tracker.record_error(&e).await;
                        }
                        outcome.errors.push(e);
                    }
                }
            }
            let found = outcome.events.len() - before;
            outcome.pages_scraped += 1;
            if let Some(tracker) = tracker {
                tracker.record_page(found).await;
            }
            tracing::debug!(
                target_id = %target.id,
                page = page_index + 1,
                items = fresh_items.len(),
                events = found,
                "scraped listing page"
            );
        }

        outcome.venues = unique_venues(&outcome.events);
        if let Some(tracker) = tracker {
            tracker.record_venues(outcome.venues.len()).await;
        }
        tracing::info!(
            target_id = %target.id,
            events = outcome.events.len(),
            venues = outcome.venues.len(),
            pages = outcome.pages_scraped,
            "target scraped"
        );
        Ok(outcome)
    }

    async fn page_failed(
        &self,
        outcome: &mut ScrapeOutcome,
        target: &ScrapeTarget,
        page_index: u32,
        error: ScrapingError,
        tracker: Option<&SessionTracker>,
    ) {
        tracing::warn!(
            target_id = %target.id,
            page = page_index + 1,
            error = %error,
            "page failed; stopping pagination"
        );
        if let Some(tracker) = tracker {
            tracker.record_error(&error).await;
        }
        outcome.errors.push(error);
    }

    /// Moves to page `page_index`; `Ok(false)` when there is no next page.
    async fn advance(
        &self,
        handle: &SessionHandle,
        target: &ScrapeTarget,
        page_index: u32,
        context: &RetryContext,
        tracker: Option<&SessionTracker>,
    ) -> Result<bool, ScrapingError> {
        let action_timeout = context.scale_timeout(self.config.timeouts.action);
        match &target.pagination {
            PaginationStrategy::None => Ok(false),
            PaginationStrategy::Button { selector } => {
                if !handle.page.wait_for_selector(selector, action_timeout).await? {
                    return Ok(false);
                }
                handle.page.click(selector, action_timeout).await?;
                Ok(true)
            }
            PaginationStrategy::InfiniteScroll => {
                handle.page.evaluate(SCROLL_TO_BOTTOM).await?;
                Ok(true)
            }
            PaginationStrategy::UrlParameter { param, start, step } => {
                let value = start.saturating_add(step.saturating_mul(page_index));
                let url = page_url(&target.base_url, param, value)?;
                self.navigate(handle, &url, context, tracker).await?;
                Ok(true)
            }
        }
    }

    /// The primary container, else the first fallback container present.
    async fn resolve_container(
        &self,
        handle: &SessionHandle,
        selectors: &SelectorMap,
        context: &RetryContext,
    ) -> Result<Option<String>, ScrapingError> {
        let wait = context.scale_timeout(self.config.timeouts.wait);
        if handle.page.wait_for_selector(&selectors.container, wait).await? {
            return Ok(Some(selectors.container.clone()));
        }
        let short_wait = context.scale_timeout(self.config.timeouts.action);
        for fallback in &selectors.fallback_containers {
            if handle.page.wait_for_selector(fallback, short_wait).await? {
                tracing::warn!(
                    primary = %selectors.container,
                    fallback = %fallback,
                    "listing container missing; using fallback container"
                );
                return Ok(Some(fallback.clone()));
            }
        }
        Ok(None)
    }

    async fn navigate(
        &self,
        handle: &SessionHandle,
        url: &str,
        context: &RetryContext,
        tracker: Option<&SessionTracker>,
    ) -> Result<(), ScrapingError> {
        let options = NavigationOptions {
            timeout: context.scale_timeout(self.config.timeouts.navigation),
        };
        let result = async {
            let response = handle.page.goto(url, options).await?;
            if let Some(err) = error_for_status(response.status, &response.url) {
                return Err(err);
            }
            let body = handle.page.content().await?;
            match detect_challenge(&body) {
                Some(err) => Err(err.with_url(url)),
                None => Ok(response),
            }
        }
        .await;

        if let Some(tracker) = tracker {
            tracker.record_request(result.is_ok()).await;
        }
        let response = result.map_err(|e| {
            if e.url.is_none() {
                e.with_url(url)
            } else {
                e
            }
        })?;
        tracing::debug!(url, status = response.status, "navigated");
        Ok(())
    }

    async fn dismiss_cookie_banner(&self, handle: &SessionHandle, target: &ScrapeTarget) {
        let Some(consent) = &target.cookie_consent else {
            return;
        };
        let timeout = consent
            .timeout_ms
            .map_or(self.config.timeouts.action, Duration::from_millis);
        match handle.page.wait_for_selector(&consent.accept_selector, timeout).await {
            Ok(true) => {
                if let Err(e) = handle.page.click(&consent.accept_selector, timeout).await {
                    tracing::debug!(
                        target_id = %target.id,
                        error = %e,
                        "cookie banner click failed"
                    );
                } else {
                    tracing::debug!(target_id = %target.id, "cookie banner dismissed");
                }
            }
            Ok(false) => tracing::debug!(target_id = %target.id, "no cookie banner"),
            Err(e) => {
                tracing::debug!(target_id = %target.id, error = %e, "cookie banner check failed");
            }
        }
    }

    async fn login(
        &self,
        handle: &SessionHandle,
        auth: &AuthConfig,
        context: &RetryContext,
        tracker: Option<&SessionTracker>,
    ) -> Result<(), ScrapingError> {
        self.navigate(handle, &auth.login_url, context, tracker).await?;
        let wait = context.scale_timeout(self.config.timeouts.wait);
        if !handle.page.wait_for_selector(&auth.username_selector, wait).await? {
            return Err(ScrapingError::auth("login form not found")
                .with_selector(&auth.username_selector)
                .with_url(&auth.login_url));
        }
        handle.page.fill(&auth.username_selector, &auth.username).await?;
        handle.page.fill(&auth.password_selector, &auth.password).await?;
        handle
            .page
            .click(&auth.submit_selector, context.scale_timeout(self.config.timeouts.action))
            .await?;
        tracing::info!(login_url = %auth.login_url, "logged in");
        Ok(())
    }
}

/// `base` with query parameter `param` set to `value`.
///
/// # Errors
///
/// Returns a `validation` error if `base` is not an absolute URL.
pub fn page_url(base: &str, param: &str, value: u32) -> Result<String, ScrapingError> {
    let mut url = Url::parse(base).map_err(|e| {
        ScrapingError::validation(format!("invalid base url '{base}': {e}")).with_url(base)
    })?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &value.to_string());
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_replaces_existing_parameter() {
        assert_eq!(
            page_url("https://example.com/events?city=austin&page=1", "page", 3).unwrap(),
            "https://example.com/events?city=austin&page=3"
        );
        assert_eq!(
            page_url("https://example.com/events", "offset", 40).unwrap(),
            "https://example.com/events?offset=40"
        );
        assert!(page_url("/relative", "page", 2).is_err());
    }

    #[test]
    fn skipped_outcome_is_flagged() {
        let target: ScrapeTarget = serde_json::from_value(serde_json::json!({
            "id": "t",
            "source": "s",
            "base_url": "https://example.com",
            "selectors": {"container": ".c", "item": ".i"}
        }))
        .unwrap();
        let outcome = ScrapeOutcome::skipped(&target);
        assert!(outcome.skipped);
        assert!(outcome.is_empty());
        assert_eq!(outcome.fallback_used.as_deref(), Some("skip"));
    }
}
