//! Plain-HTTP page renderer.
//!
//! [`StaticRenderer`] fetches documents with `reqwest` and answers DOM
//! queries by parsing the fetched HTML. It runs no JavaScript, so it suits
//! server-rendered listings: `click` follows anchors only, `fill` is
//! unsupported, and `evaluate` understands a handful of read-only
//! expressions plus scroll calls (which are no-ops).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use url::Url;

use crate::challenge::detect_challenge;
use crate::error::{error_for_status, ScrapingError};
use crate::renderer::{
    glob_matches, ContextOptions, ElementSnapshot, InterceptedRequest, NavigationOptions,
    NavigationResponse, PageRenderer, RendererBrowser, RendererContext, RendererPage,
    ResourceType, RouteDecision, RouteHandler,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct StaticRenderer {
    client: reqwest::Client,
}

impl StaticRenderer {
    /// # Errors
    ///
    /// Returns a `network` error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ScrapingError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ScrapingError::network(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageRenderer for StaticRenderer {
    async fn launch(&self) -> Result<Arc<dyn RendererBrowser>, ScrapingError> {
        Ok(Arc::new(StaticBrowser {
            client: self.client.clone(),
            connected: AtomicBool::new(true),
        }))
    }
}

struct StaticBrowser {
    client: reqwest::Client,
    connected: AtomicBool,
}

#[async_trait]
impl RendererBrowser for StaticBrowser {
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> Result<Arc<dyn RendererContext>, ScrapingError> {
        if !self.is_connected() {
            return Err(ScrapingError::network("browser is closed"));
        }
        Ok(Arc::new(StaticContext {
            shared: Arc::new(ContextShared {
                client: self.client.clone(),
                options,
                routes: Mutex::new(Vec::new()),
            }),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ScrapingError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct ContextShared {
    client: reqwest::Client,
    options: ContextOptions,
    routes: Mutex<Vec<(String, Arc<dyn RouteHandler>)>>,
}

impl ContextShared {
    /// First matching route handler decides; unrouted requests continue.
    async fn route_decision(&self, request: &InterceptedRequest) -> RouteDecision {
        let handlers: Vec<Arc<dyn RouteHandler>> = self
            .routes
            .lock()
            .await
            .iter()
            .filter(|(pattern, _)| glob_matches(pattern, &request.url))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            if handler.handle(request).await == RouteDecision::Abort {
                return RouteDecision::Abort;
            }
        }
        RouteDecision::Continue
    }
}

struct StaticContext {
    shared: Arc<ContextShared>,
    closed: AtomicBool,
}

#[async_trait]
impl RendererContext for StaticContext {
    async fn new_page(&self) -> Result<Arc<dyn RendererPage>, ScrapingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScrapingError::network("context is closed"));
        }
        Ok(Arc::new(StaticPage {
            context: Arc::clone(&self.shared),
            document: StdMutex::new(Document::default()),
        }))
    }

    async fn route(
        &self,
        pattern: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), ScrapingError> {
        self.shared
            .routes
            .lock()
            .await
            .push((pattern.to_string(), handler));
        Ok(())
    }

    async fn close(&self) -> Result<(), ScrapingError> {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.routes.lock().await.clear();
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct Document {
    url: String,
    html: String,
}

struct StaticPage {
    context: Arc<ContextShared>,
    document: StdMutex<Document>,
}

impl StaticPage {
    fn document(&self) -> Document {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_document(&self, document: Document) {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = document;
    }

    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<NavigationResponse, ScrapingError> {
        let request = InterceptedRequest {
            url: url.to_string(),
            resource_type: ResourceType::Document,
            is_navigation: true,
        };
        if self.context.route_decision(&request).await == RouteDecision::Abort {
            return Err(ScrapingError::network("navigation aborted by route handler").with_url(url));
        }

        let options = &self.context.options;
        let mut builder = self.context.client.get(url).timeout(timeout);
        if !options.user_agent.is_empty() {
            builder = builder.header(USER_AGENT, options.user_agent.as_str());
        }
        for (name, value) in &options.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| map_http_error(&e, url))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| map_http_error(&e, url))?;
        let challenge = detect_challenge(&html);
        self.set_document(Document {
            url: final_url.clone(),
            html,
        });

        if let Some(err) = error_for_status(status, &final_url) {
            return Err(err);
        }
        if let Some(err) = challenge {
            return Err(err.with_url(final_url));
        }
        tracing::debug!(url = %final_url, status, "fetched document");
        Ok(NavigationResponse {
            status,
            url: final_url,
        })
    }
}

fn map_http_error(err: &reqwest::Error, url: &str) -> ScrapingError {
    let scraping = if err.is_timeout() {
        ScrapingError::timeout(format!("request timed out: {err}"))
    } else if err.is_connect() {
        ScrapingError::network(format!("connection failed: {err}"))
    } else {
        ScrapingError::network(format!("request failed: {err}"))
    };
    scraping.with_url(url)
}

fn parse_selector(selector: &str) -> Result<Selector, ScrapingError> {
    Selector::parse(selector).map_err(|e| {
        ScrapingError::parsing(format!("invalid selector '{selector}': {e}"))
            .with_selector(selector)
    })
}

fn snapshots(html: &str, selector: &Selector) -> Vec<ElementSnapshot> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .map(|el| ElementSnapshot {
            text: el
                .text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" "),
            html: el.html(),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .collect()
}

fn title(html: &str) -> String {
    let document = Html::parse_document(html);
    Selector::parse("title")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}

#[async_trait]
impl RendererPage for StaticPage {
    async fn goto(
        &self,
        url: &str,
        options: NavigationOptions,
    ) -> Result<NavigationResponse, ScrapingError> {
        self.fetch(url, options.timeout).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<bool, ScrapingError> {
        // Nothing changes after load, so there is nothing to wait for.
        let selector = parse_selector(selector)?;
        let html = self.document().html;
        Ok(Html::parse_document(&html).select(&selector).next().is_some())
    }

    async fn query_selector_all(
        &self,
        selector: &str,
    ) -> Result<Vec<ElementSnapshot>, ScrapingError> {
        let selector = parse_selector(selector)?;
        Ok(snapshots(&self.document().html, &selector))
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), ScrapingError> {
        let parsed = parse_selector(selector)?;
        let document = self.document();
        let target = snapshots(&document.html, &parsed)
            .into_iter()
            .next()
            .ok_or_else(|| {
                ScrapingError::parsing(format!("nothing to click for '{selector}'"))
                    .with_selector(selector)
                    .with_url(&document.url)
            })?;
        let href = target.attributes.get("href").ok_or_else(|| {
            ScrapingError::validation(format!(
                "static renderer can only follow links; '{selector}' has no href"
            ))
            .with_selector(selector)
        })?;
        let next = Url::parse(&document.url)
            .and_then(|base| base.join(href))
            .map_err(|e| {
                ScrapingError::parsing(format!("unresolvable link '{href}': {e}"))
                    .with_selector(selector)
            })?;
        self.fetch(next.as_str(), timeout).await.map(|_| ())
    }

    async fn fill(&self, selector: &str, _value: &str) -> Result<(), ScrapingError> {
        Err(ScrapingError::auth("static renderer cannot fill forms").with_selector(selector))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapingError> {
        let script = script.trim().trim_end_matches(';');
        let document = self.document();
        match script {
            "document.title" => Ok(serde_json::Value::String(title(&document.html))),
            "window.location.href" | "location.href" | "document.URL" => {
                Ok(serde_json::Value::String(document.url))
            }
            "document.readyState" => Ok(serde_json::Value::String("complete".to_string())),
            "document.documentElement.outerHTML" => Ok(serde_json::Value::String(document.html)),
            s if s.starts_with("window.scrollTo") || s.starts_with("window.scrollBy") => {
                Ok(serde_json::Value::Null)
            }
            other => Err(ScrapingError::validation(format!(
                "static renderer cannot evaluate '{other}'"
            ))),
        }
    }

    async fn content(&self) -> Result<String, ScrapingError> {
        Ok(self.document().html)
    }

    fn url(&self) -> String {
        self.document().url
    }

    async fn close(&self) -> Result<(), ScrapingError> {
        self.set_document(Document::default());
        Ok(())
    }
}
