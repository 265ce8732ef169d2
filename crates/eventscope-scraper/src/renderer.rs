//! Page renderer contract.
//!
//! The engine drives pages through these traits and never names a concrete
//! browser. Implementations report failures as classified
//! [`ScrapingError`]s at the point they happen: a navigation timeout is a
//! `timeout`, a refused connection is `network`, and so on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventscope_core::Viewport;
use serde::{Deserialize, Serialize};

use crate::error::ScrapingError;

/// Serializable snapshot of one DOM element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    /// Concatenated text content.
    pub text: String,
    /// Outer HTML.
    pub html: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Fetch,
    Other,
}

impl ResourceType {
    /// Resource types a listing scrape never needs.
    #[must_use]
    pub fn is_non_essential(self) -> bool {
        matches!(
            self,
            ResourceType::Image
                | ResourceType::Media
                | ResourceType::Font
                | ResourceType::Stylesheet
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub resource_type: ResourceType,
    /// Top-level document navigation, as opposed to a subresource.
    pub is_navigation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOptions {
    pub user_agent: String,
    pub viewport: Option<Viewport>,
    pub locale: String,
    pub timezone: String,
    /// Scripts run in every page before any site script.
    pub init_scripts: Vec<String>,
    pub extra_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationOptions {
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
}

/// Decides whether an intercepted request proceeds.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: &InterceptedRequest) -> RouteDecision;
}

/// Entry point: starts a browser.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// # Errors
    ///
    /// Returns a `network` error if the browser cannot be started.
    async fn launch(&self) -> Result<Arc<dyn RendererBrowser>, ScrapingError>;
}

#[async_trait]
pub trait RendererBrowser: Send + Sync {
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> Result<Arc<dyn RendererContext>, ScrapingError>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), ScrapingError>;
}

#[async_trait]
pub trait RendererContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn RendererPage>, ScrapingError>;

    /// Registers `handler` for requests whose URL matches the glob `pattern`.
    async fn route(
        &self,
        pattern: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), ScrapingError>;

    async fn close(&self) -> Result<(), ScrapingError>;
}

#[async_trait]
pub trait RendererPage: Send + Sync {
    async fn goto(
        &self,
        url: &str,
        options: NavigationOptions,
    ) -> Result<NavigationResponse, ScrapingError>;

    /// Waits until `selector` matches. `Ok(false)` when `timeout` elapses
    /// without a match.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, ScrapingError>;

    async fn query_selector_all(&self, selector: &str)
        -> Result<Vec<ElementSnapshot>, ScrapingError>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), ScrapingError>;

    async fn fill(&self, selector: &str, value: &str) -> Result<(), ScrapingError>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapingError>;

    /// Current document HTML.
    async fn content(&self) -> Result<String, ScrapingError>;

    fn url(&self) -> String;

    async fn close(&self) -> Result<(), ScrapingError>;
}

/// Glob match used for route patterns: `*` matches any run of characters
/// (including `/`), `?` matches one character.
#[must_use]
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
