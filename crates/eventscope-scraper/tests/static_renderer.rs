//! `StaticRenderer` against a local `wiremock` server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, listing_page, target};
use eventscope_core::PaginationStrategy;
use eventscope_scraper::renderer::{ContextOptions, NavigationOptions, PageRenderer};
use eventscope_scraper::{ErrorKind, RateLimiter, RetryContext, StaticRenderer, TargetScraper};
use wiremock::matchers::{header, headers, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body)
}

fn navigation() -> NavigationOptions {
    NavigationOptions {
        timeout: Duration::from_secs(5),
    }
}

async fn open_page() -> Arc<dyn eventscope_scraper::RendererPage> {
    let renderer = StaticRenderer::new().unwrap();
    let browser = renderer.launch().await.unwrap();
    let mut options = ContextOptions {
        user_agent: "eventscope-test/0.1".to_string(),
        ..ContextOptions::default()
    };
    options
        .extra_headers
        .insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
    let context = browser.new_context(options).await.unwrap();
    context.new_page().await.unwrap()
}

#[tokio::test]
async fn scrapes_paginated_listing_over_http() {
    let server = MockServer::start().await;
    let base = format!("{}/events", server.uri());

    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("page", "2"))
        .respond_with(html(listing_page(
            &[("Blues Jam", "2025-10-11", "Antone's", "Austin", "music")],
            None,
        )))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("page", "3"))
        .respond_with(html(listing_page(&[], None)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(html(listing_page(
            &[("Jazz Night", "2025-10-10", "Elephant Room", "Austin", "music")],
            None,
        )))
        .mount(&server)
        .await;

    let mut target = target("austin", &base);
    target.pagination = PaginationStrategy::UrlParameter {
        param: "page".to_string(),
        start: 1,
        step: 1,
    };
    let config = fast_config(0);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let renderer: Arc<dyn PageRenderer> = Arc::new(StaticRenderer::new().unwrap());
    let scraper = TargetScraper::new(renderer, config, limiter, "austin");

    let outcome = scraper
        .scrape(&target, &RetryContext::default(), None)
        .await
        .unwrap();
    scraper.shutdown().await;

    let titles: Vec<&str> = outcome
        .events
        .iter()
        .filter_map(|e| e.title.as_deref())
        .collect();
    assert_eq!(titles, vec!["Jazz Night", "Blues Jam"]);
    assert_eq!(outcome.pages_scraped, 2, "empty third page ends pagination");
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn sends_context_identity_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("user-agent", "eventscope-test/0.1"))
        // wiremock splits multi-valued headers on commas.
        .and(headers("accept-language", vec!["en-US", "en;q=0.9"]))
        .respond_with(html("<html><head><title>Home</title></head></html>".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let page = open_page().await;
    let response = page
        .goto(&format!("{}/", server.uri()), navigation())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(page.evaluate("document.title").await.unwrap(), "Home");
    assert_eq!(page.url(), format!("{}/", server.uri()));
}

#[tokio::test]
async fn maps_http_status_to_error_kinds() {
    let server = MockServer::start().await;
    for (route, status) in [
        ("/limited", 429),
        ("/forbidden", 403),
        ("/gone", 404),
        ("/broken", 502),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let page = open_page().await;
    let kind = |route: &'static str| {
        let page = Arc::clone(&page);
        let url = format!("{}{route}", server.uri());
        async move { page.goto(&url, navigation()).await.unwrap_err().kind }
    };

    assert_eq!(kind("/limited").await, ErrorKind::RateLimit);
    assert_eq!(kind("/forbidden").await, ErrorKind::Blocked);
    assert_eq!(kind("/gone").await, ErrorKind::Validation);
    assert_eq!(kind("/broken").await, ErrorKind::Network);
}

#[tokio::test]
async fn cloudflare_interstitial_is_blocked_even_with_200() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(html(
            "<html><head><title>Just a moment...</title></head>\
             <body><script src=\"/cdn-cgi/challenge-platform/h/b/orchestrate\"></script></body></html>"
                .to_string(),
        ))
        .mount(&server)
        .await;

    let page = open_page().await;
    let err = page
        .goto(&format!("{}/events", server.uri()), navigation())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Blocked);
    assert!(err.url.as_deref().unwrap().ends_with("/events"));
}

#[tokio::test]
async fn click_follows_relative_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(html(
            r#"<html><body><a class="next" href="/events/page/2">Next</a></body></html>"#
                .to_string(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events/page/2"))
        .respond_with(html(
            r#"<html><body><div class="events"><p class="event">Late show</p></div></body></html>"#
                .to_string(),
        ))
        .mount(&server)
        .await;

    let page = open_page().await;
    page.goto(&format!("{}/events", server.uri()), navigation())
        .await
        .unwrap();
    page.click("a.next", Duration::from_secs(5)).await.unwrap();

    assert!(page.url().ends_with("/events/page/2"));
    let items = page.query_selector_all(".events .event").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].text, "Late show");
    assert!(page
        .wait_for_selector(".missing", Duration::from_millis(10))
        .await
        .is_ok_and(|found| !found));
    assert_eq!(page.fill("#q", "x").await.unwrap_err().kind, ErrorKind::Auth);
}
