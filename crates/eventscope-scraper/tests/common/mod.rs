#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eventscope_core::{RateLimitConfig, RetryPolicy, ScrapeTarget, ScraperConfig};
use eventscope_scraper::renderer::{
    glob_matches, ContextOptions, ElementSnapshot, InterceptedRequest, NavigationOptions,
    NavigationResponse, PageRenderer, RendererBrowser, RendererContext, RendererPage,
    ResourceType, RouteDecision, RouteHandler,
};
use eventscope_scraper::ScrapingError;
use scraper::{Html, Selector};

/// In-memory website driven through the renderer traits.
///
/// Pages are keyed by exact URL; unknown URLs answer 404. Failures can be
/// queued per URL (consumed one per navigation) or set permanently.
#[derive(Default)]
pub struct ScriptedSite {
    pages: Mutex<HashMap<String, (u16, String)>>,
    queued_failures: Mutex<HashMap<String, VecDeque<ScrapingError>>>,
    permanent_failures: Mutex<HashMap<String, ScrapingError>>,
    navigation_delay: Mutex<Option<Duration>>,
    browser_disconnected: AtomicBool,
    /// Makes `new_page` fail, as if the renderer crashed mid-setup.
    pub fail_page_setup: AtomicBool,
    last_routes: Mutex<Option<Routes>>,
    pub visits: Mutex<Vec<String>>,
    pub clicks: Mutex<Vec<String>>,
    pub fills: Mutex<Vec<(String, String)>>,
    pub launches: AtomicUsize,
    pub contexts_opened: AtomicUsize,
    pub contexts_closed: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub browsers_closed: AtomicUsize,
}

impl ScriptedSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page(&self, url: &str, html: impl Into<String>) {
        self.page_with_status(url, 200, html);
    }

    pub fn page_with_status(&self, url: &str, status: u16, html: impl Into<String>) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, html.into()));
    }

    pub fn fail_next(&self, url: &str, error: ScrapingError) {
        self.queued_failures
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn fail_always(&self, url: &str, error: ScrapingError) {
        self.permanent_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), error);
    }

    pub fn delay_navigation(&self, delay: Duration) {
        *self.navigation_delay.lock().unwrap() = Some(delay);
    }

    /// Drops the connection of the currently launched browser.
    pub fn disconnect_browser(&self) {
        self.browser_disconnected.store(true, Ordering::SeqCst);
    }

    /// Sends a subresource request through the most recent context's routes.
    pub async fn dispatch(&self, url: &str, resource_type: ResourceType) -> RouteDecision {
        let routes = self.last_routes.lock().unwrap().clone();
        let Some(routes) = routes else {
            return RouteDecision::Continue;
        };
        let request = InterceptedRequest {
            url: url.to_string(),
            resource_type,
            is_navigation: false,
        };
        for handler in matching_handlers(&routes, url) {
            if handler.handle(&request).await == RouteDecision::Abort {
                return RouteDecision::Abort;
            }
        }
        RouteDecision::Continue
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub fn visit_count(&self, url: &str) -> usize {
        self.visits.lock().unwrap().iter().filter(|v| *v == url).count()
    }

    pub fn renderer(self: &Arc<Self>) -> Arc<dyn PageRenderer> {
        Arc::new(ScriptedRenderer {
            site: Arc::clone(self),
        })
    }

    fn scripted_failure(&self, url: &str) -> Option<ScrapingError> {
        if let Some(err) = self
            .queued_failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
        {
            return Some(err);
        }
        self.permanent_failures.lock().unwrap().get(url).cloned()
    }
}

struct ScriptedRenderer {
    site: Arc<ScriptedSite>,
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn launch(&self) -> Result<Arc<dyn RendererBrowser>, ScrapingError> {
        self.site.launches.fetch_add(1, Ordering::SeqCst);
        self.site.browser_disconnected.store(false, Ordering::SeqCst);
        Ok(Arc::new(ScriptedBrowser {
            site: Arc::clone(&self.site),
            connected: AtomicBool::new(true),
        }))
    }
}

struct ScriptedBrowser {
    site: Arc<ScriptedSite>,
    connected: AtomicBool,
}

#[async_trait]
impl RendererBrowser for ScriptedBrowser {
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> Result<Arc<dyn RendererContext>, ScrapingError> {
        self.site.contexts_opened.fetch_add(1, Ordering::SeqCst);
        let routes: Routes = Arc::new(Mutex::new(Vec::new()));
        *self.site.last_routes.lock().unwrap() = Some(Arc::clone(&routes));
        Ok(Arc::new(ScriptedContext {
            site: Arc::clone(&self.site),
            options,
            routes,
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && !self.site.browser_disconnected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ScrapingError> {
        self.connected.store(false, Ordering::SeqCst);
        self.site.browsers_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type Routes = Arc<Mutex<Vec<(String, Arc<dyn RouteHandler>)>>>;

fn matching_handlers(routes: &Routes, url: &str) -> Vec<Arc<dyn RouteHandler>> {
    routes
        .lock()
        .unwrap()
        .iter()
        .filter(|(pattern, _)| glob_matches(pattern, url))
        .map(|(_, h)| Arc::clone(h))
        .collect()
}

struct ScriptedContext {
    site: Arc<ScriptedSite>,
    options: ContextOptions,
    routes: Routes,
}

#[async_trait]
impl RendererContext for ScriptedContext {
    async fn new_page(&self) -> Result<Arc<dyn RendererPage>, ScrapingError> {
        if self.site.fail_page_setup.load(Ordering::SeqCst) {
            return Err(ScrapingError::network("renderer crashed opening page"));
        }
        self.site.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedPage {
            site: Arc::clone(&self.site),
            user_agent: self.options.user_agent.clone(),
            routes: Arc::clone(&self.routes),
            current: Mutex::new((String::new(), String::new())),
        }))
    }

    async fn route(
        &self,
        pattern: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), ScrapingError> {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), handler));
        Ok(())
    }

    async fn close(&self) -> Result<(), ScrapingError> {
        self.site.contexts_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedPage {
    site: Arc<ScriptedSite>,
    user_agent: String,
    routes: Routes,
    /// (url, html)
    current: Mutex<(String, String)>,
}

impl ScriptedPage {
    fn html(&self) -> String {
        self.current.lock().unwrap().1.clone()
    }

    fn select(&self, selector: &str) -> Result<Vec<ElementSnapshot>, ScrapingError> {
        let parsed = Selector::parse(selector)
            .map_err(|e| ScrapingError::parsing(format!("bad selector {selector}: {e}")))?;
        let document = Html::parse_document(&self.html());
        Ok(document
            .select(&parsed)
            .map(|el| ElementSnapshot {
                text: el.text().collect::<Vec<_>>().join(" ").trim().to_string(),
                html: el.html(),
                attributes: el
                    .value()
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .collect())
    }
}

#[async_trait]
impl RendererPage for ScriptedPage {
    async fn goto(
        &self,
        url: &str,
        _options: NavigationOptions,
    ) -> Result<NavigationResponse, ScrapingError> {
        let handlers = matching_handlers(&self.routes, url);
        let request = InterceptedRequest {
            url: url.to_string(),
            resource_type: ResourceType::Document,
            is_navigation: true,
        };
        for handler in handlers {
            if handler.handle(&request).await == RouteDecision::Abort {
                return Err(ScrapingError::network("aborted by route"));
            }
        }

        self.site.visits.lock().unwrap().push(url.to_string());
        let delay = *self.site.navigation_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.site.scripted_failure(url) {
            return Err(err.with_url(url));
        }
        let (status, html) = self
            .site
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or((404, String::new()));
        *self.current.lock().unwrap() = (url.to_string(), html);
        Ok(NavigationResponse {
            status,
            url: url.to_string(),
        })
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<bool, ScrapingError> {
        Ok(!self.select(selector)?.is_empty())
    }

    async fn query_selector_all(
        &self,
        selector: &str,
    ) -> Result<Vec<ElementSnapshot>, ScrapingError> {
        self.select(selector)
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), ScrapingError> {
        self.site.clicks.lock().unwrap().push(selector.to_string());
        let first = self
            .select(selector)?
            .into_iter()
            .next()
            .ok_or_else(|| ScrapingError::parsing(format!("nothing matches {selector}")))?;
        if let Some(href) = first.attributes.get("href") {
            self.goto(href, NavigationOptions { timeout }).await?;
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), ScrapingError> {
        self.site
            .fills
            .lock()
            .unwrap()
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, ScrapingError> {
        Ok(serde_json::Value::Null)
    }

    async fn content(&self) -> Result<String, ScrapingError> {
        Ok(self.html())
    }

    fn url(&self) -> String {
        self.current.lock().unwrap().0.clone()
    }

    async fn close(&self) -> Result<(), ScrapingError> {
        self.site.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One listing item: (title, date, venue, city, category).
pub type Listing<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str);

pub fn listing_page(items: &[Listing<'_>], next: Option<&str>) -> String {
    let mut html =
        String::from("<html><head><title>Events</title></head><body><ul class=\"events\">");
    for (title, date, venue, city, category) in items {
        html.push_str(&format!(
            "<li class=\"event\"><h3 class=\"title\">{title}</h3>\
             <span class=\"date\">{date}</span><span class=\"time\">8:00 PM</span>\
             <span class=\"venue\">{venue}</span><span class=\"city\">{city}</span>\
             <span class=\"tag\">{category}</span></li>"
        ));
    }
    html.push_str("</ul>");
    if let Some(next) = next {
        html.push_str(&format!("<a class=\"next\" href=\"{next}\">Next</a>"));
    }
    html.push_str("</body></html>");
    html
}

pub fn target(id: &str, base_url: &str) -> ScrapeTarget {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "source": id,
        "base_url": base_url,
        "timezone": "UTC",
        "selectors": {
            "container": ".events",
            "item": ".event",
            "fields": {
                "title": ".title",
                "date": ".date",
                "time": ".time",
                "venue": ".venue",
                "venue_city": ".city",
                "category": ".tag"
            }
        }
    }))
    .unwrap()
}

/// Scraper settings with no pacing, so tests measure only retry delays.
pub fn fast_config(max_retries: u32) -> ScraperConfig {
    ScraperConfig {
        rate_limit: RateLimitConfig {
            requests_per_minute: 1_000,
            burst_size: 1_000,
            inter_request_delay: Duration::ZERO,
        },
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        },
        ..ScraperConfig::default()
    }
}
