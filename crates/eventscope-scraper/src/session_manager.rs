//! Renderer session pool for one target scraper.
//!
//! Sessions are created lazily on first use and reused until a caller asks
//! for a fresh one (identity rotation, re-authentication) or destroys it
//! after a hard failure. Every context gets a route handler that drops
//! non-essential subresources and holds document navigations until the
//! target's rate limiter admits them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eventscope_core::ScraperConfig;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::error::ScrapingError;
use crate::identity::{Identity, STEALTH_INIT_SCRIPT};
use crate::metrics::HealthStatus;
use crate::rate_limit::RateLimiter;
use crate::renderer::{
    ContextOptions, InterceptedRequest, PageRenderer, RendererBrowser, RendererContext,
    RendererPage, RouteDecision, RouteHandler,
};

/// A live renderer page plus the identity it presents.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub page: Arc<dyn RendererPage>,
    pub identity: Identity,
    authenticated: Arc<AtomicBool>,
}

impl SessionHandle {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

struct OpenSession {
    context: Arc<dyn RendererContext>,
    page: Arc<dyn RendererPage>,
    _permit: OwnedSemaphorePermit,
}

struct ThrottlingRouteHandler {
    rate_limiter: Arc<RateLimiter>,
    target_id: String,
}

#[async_trait]
impl RouteHandler for ThrottlingRouteHandler {
    async fn handle(&self, request: &InterceptedRequest) -> RouteDecision {
        if request.is_navigation {
            self.rate_limiter.wait_until_allowed(&self.target_id).await;
            return RouteDecision::Continue;
        }
        if request.resource_type.is_non_essential() {
            return RouteDecision::Abort;
        }
        RouteDecision::Continue
    }
}

pub struct SessionManager {
    renderer: Arc<dyn PageRenderer>,
    config: ScraperConfig,
    rate_limiter: Arc<RateLimiter>,
    target_id: String,
    browser: Mutex<Option<Arc<dyn RendererBrowser>>>,
    sessions: Mutex<HashMap<Uuid, OpenSession>>,
    warm: Mutex<Option<SessionHandle>>,
    permits: Arc<Semaphore>,
    sessions_created: AtomicU64,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        config: ScraperConfig,
        rate_limiter: Arc<RateLimiter>,
        target_id: &str,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_sessions.max(1)));
        Self {
            renderer,
            config,
            rate_limiter,
            target_id: target_id.to_string(),
            browser: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
            warm: Mutex::new(None),
            permits,
            sessions_created: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Returns the reusable session, creating one if there is none. With
    /// `fresh`, the current session is destroyed first.
    ///
    /// # Errors
    ///
    /// Propagates renderer failures from launching the browser or opening
    /// the context/page, and returns a `timeout` error if no session slot
    /// frees up within the wait timeout.
    pub async fn acquire(&self, fresh: bool) -> Result<SessionHandle, ScrapingError> {
        if fresh {
            let stale = self.warm.lock().await.take();
            if let Some(stale) = stale {
                self.destroy_session(stale.id).await;
            }
        }
        if let Some(handle) = self.warm.lock().await.clone() {
            return Ok(handle);
        }
        let handle = self.create_session().await?;
        *self.warm.lock().await = Some(handle.clone());
        Ok(handle)
    }

    /// Opens a new context and page with a freshly picked identity.
    ///
    /// # Errors
    ///
    /// See [`Self::acquire`]. A context whose setup fails is closed before
    /// the error is returned.
    pub async fn create_session(&self) -> Result<SessionHandle, ScrapingError> {
        let browser = self.browser().await?;
        let permit = tokio::time::timeout(
            self.config.timeouts.wait,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            ScrapingError::timeout(format!(
                "no renderer session slot freed up for {}",
                self.target_id
            ))
        })?
        .map_err(|_| ScrapingError::network("renderer session pool is closed"))?;

        let identity = Identity::pick(&self.config.identity);
        let mut options = ContextOptions {
            user_agent: identity.user_agent.clone(),
            viewport: Some(identity.viewport),
            locale: identity.locale.clone(),
            timezone: identity.timezone.clone(),
            ..ContextOptions::default()
        };
        options
            .extra_headers
            .insert("Accept-Language".to_string(), identity.accept_language());
        if self.config.stealth {
            options.init_scripts.push(STEALTH_INIT_SCRIPT.to_string());
        }

        let context = browser.new_context(options).await?;
        let handler = Arc::new(ThrottlingRouteHandler {
            rate_limiter: Arc::clone(&self.rate_limiter),
            target_id: self.target_id.clone(),
        });
        let page = match context.route("**/*", handler).await {
            Ok(()) => context.new_page().await,
            Err(e) => Err(e),
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = context.close().await {
                    tracing::warn!(
                        target_id = %self.target_id,
                        error = %close_err,
                        "failed to close context after setup error"
                    );
                }
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        self.sessions.lock().await.insert(
            id,
            OpenSession {
                context,
                page: Arc::clone(&page),
                _permit: permit,
            },
        );
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            target_id = %self.target_id,
            session_id = %id,
            user_agent = %identity.user_agent,
            stealth = self.config.stealth,
            "renderer session created"
        );

        Ok(SessionHandle {
            id,
            page,
            identity,
            authenticated: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Closes the session's page and context. Close failures are logged and
    /// never stop the remaining resources from being released.
    pub async fn destroy_session(&self, id: Uuid) {
        {
            let mut warm = self.warm.lock().await;
            if warm.as_ref().is_some_and(|h| h.id == id) {
                *warm = None;
            }
        }
        let Some(open) = self.sessions.lock().await.remove(&id) else {
            return;
        };
        if let Err(e) = open.page.close().await {
            tracing::warn!(session_id = %id, error = %e, "failed to close renderer page");
        }
        if let Err(e) = open.context.close().await {
            tracing::warn!(session_id = %id, error = %e, "failed to close renderer context");
        }
        tracing::debug!(
            target_id = %self.target_id,
            session_id = %id,
            "renderer session destroyed"
        );
    }

    /// Destroys every session, then closes the browser.
    pub async fn close_all(&self) {
        let ids: Vec<Uuid> = self.sessions.lock().await.keys().copied().collect();
        for id in ids {
            self.destroy_session(id).await;
        }
        let browser = self.browser.lock().await.take();
        if let Some(browser) = browser {
            if let Err(e) = browser.close().await {
                tracing::warn!(target_id = %self.target_id, error = %e, "failed to close browser");
            }
        }
    }

    /// Degraded-health signals for this pool; empty when healthy.
    pub async fn health_check(&self) -> HealthStatus {
        let mut issues = Vec::new();
        match self.browser.lock().await.as_ref() {
            None => issues.push(format!("{}: session manager not initialized", self.target_id)),
            Some(browser) if !browser.is_connected() => {
                issues.push(format!("{}: renderer disconnected", self.target_id));
            }
            Some(_) => {}
        }
        if self.rate_limiter.is_limited(&self.target_id).await {
            issues.push(format!("{}: currently rate limited", self.target_id));
        }
        if self.permits.available_permits() == 0 {
            issues.push(format!(
                "{}: session pool exhausted ({} open)",
                self.target_id,
                self.open_sessions().await
            ));
        }
        HealthStatus::from_issues(issues)
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    #[must_use]
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::SeqCst)
    }

    async fn browser(&self) -> Result<Arc<dyn RendererBrowser>, ScrapingError> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            if browser.is_connected() {
                return Ok(Arc::clone(browser));
            }
            tracing::warn!(target_id = %self.target_id, "renderer disconnected; relaunching");
        }
        let browser = self.renderer.launch().await?;
        *slot = Some(Arc::clone(&browser));
        Ok(browser)
    }
}
