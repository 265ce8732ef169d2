mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{fast_config, listing_page, target, ScriptedSite};
use eventscope_core::{AuthConfig, CookieConsent, PaginationStrategy};
use eventscope_scraper::{
    ErrorKind, RateLimiter, RetryContext, ScrapingError, ScrapingSession, SessionTracker,
    TargetScraper,
};

const BASE: &str = "https://city.example.com/events";

fn scraper(site: &Arc<ScriptedSite>) -> TargetScraper {
    let config = fast_config(0);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    TargetScraper::new(site.renderer(), config, limiter, "city")
}

#[tokio::test(start_paused = true)]
async fn follows_next_button_until_it_disappears() {
    let site = ScriptedSite::new();
    let page2 = "https://city.example.com/events/2";
    site.page(
        BASE,
        listing_page(
            &[
                ("Jazz Night", "2025-10-10", "Elephant Room", "Austin", "music"),
                ("Blues Jam", "2025-10-11", "Antone's", "Austin", "music"),
            ],
            Some(page2),
        ),
    );
    site.page(
        page2,
        listing_page(&[("Improv Hour", "2025-10-12", "ColdTowne", "Austin", "comedy")], None),
    );
    let mut target = target("city", BASE);
    target.pagination = PaginationStrategy::Button {
        selector: "a.next".to_string(),
    };
    let tracker = SessionTracker::new(ScrapingSession::new(None, "city", "city"));
    tracker.start().await;

    let outcome = scraper(&site)
        .scrape(&target, &RetryContext::default(), Some(&tracker))
        .await
        .unwrap();

    let titles: Vec<&str> = outcome
        .events
        .iter()
        .filter_map(|e| e.title.as_deref())
        .collect();
    assert_eq!(titles, vec!["Jazz Night", "Blues Jam", "Improv Hour"]);
    assert_eq!(outcome.pages_scraped, 2);
    assert_eq!(outcome.venues.len(), 3);
    assert_eq!(outcome.events[2].page_url.as_deref(), Some(page2));

    let session = tracker.snapshot().await;
    assert_eq!(session.progress.pages_scraped, 2);
    assert_eq!(session.progress.events_found, 3);
    assert_eq!(session.requests_attempted, 1);
}

#[tokio::test(start_paused = true)]
async fn url_parameter_pagination_stops_at_missing_page() {
    let site = ScriptedSite::new();
    let base = "https://city.example.com/events?city=austin";
    site.page(
        base,
        listing_page(&[("A", "2025-10-10", "Hall", "Austin", "music")], None),
    );
    site.page(
        "https://city.example.com/events?city=austin&page=2",
        listing_page(&[("B", "2025-10-11", "Hall", "Austin", "music")], None),
    );
    let mut target = target("city", base);
    target.pagination = PaginationStrategy::UrlParameter {
        param: "page".to_string(),
        start: 1,
        step: 1,
    };

    let outcome = scraper(&site)
        .scrape(&target, &RetryContext::default(), None)
        .await
        .unwrap();

    assert_eq!(outcome.events.len(), 2);
    assert_eq!(outcome.pages_scraped, 2);
    assert_eq!(outcome.errors.len(), 1, "the 404 on page 3 is recorded, not raised");
    assert_eq!(outcome.errors[0].kind, ErrorKind::Validation);
    assert_eq!(
        site.visits().last().map(String::as_str),
        Some("https://city.example.com/events?city=austin&page=3")
    );
}

#[tokio::test(start_paused = true)]
async fn dismisses_cookie_banner_and_uses_fallback_container() {
    let site = ScriptedSite::new();
    site.page(
        BASE,
        r#"<html><body>
            <div id="consent"><button id="accept">OK</button></div>
            <section class="listing">
              <div class="event"><h3 class="title">Gallery Walk</h3><span class="date">2025-10-10</span></div>
              <div class="event"><span class="date">2025-10-11</span></div>
            </section>
        </body></html>"#,
    );
    let mut target = target("city", BASE);
    target.selectors.fallback_containers = vec!["section.listing".to_string()];
    target.cookie_consent = Some(CookieConsent {
        accept_selector: "#accept".to_string(),
        timeout_ms: Some(500),
    });

    let outcome = scraper(&site)
        .scrape(&target, &RetryContext::default(), None)
        .await
        .unwrap();

    assert_eq!(*site.clicks.lock().unwrap(), vec!["#accept"]);
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].title.as_deref(), Some("Gallery Walk"));
    assert_eq!(outcome.errors.len(), 1, "item without a title is skipped");
    assert_eq!(outcome.errors[0].kind, ErrorKind::Parsing);
}

#[tokio::test(start_paused = true)]
async fn missing_container_on_first_page_is_a_parsing_error() {
    let site = ScriptedSite::new();
    site.page(BASE, "<html><body><p>Nothing scheduled</p></body></html>");

    let err = scraper(&site)
        .scrape(&target("city", BASE), &RetryContext::default(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Parsing);
    assert_eq!(err.selector.as_deref(), Some(".events"));
}

#[tokio::test(start_paused = true)]
async fn logs_in_before_scraping_and_reuses_the_session() {
    let site = ScriptedSite::new();
    let login = "https://city.example.com/login";
    site.page(
        login,
        r#"<form><input id="user"><input id="pass" type="password"><button id="go">Go</button></form>"#,
    );
    site.page(
        BASE,
        listing_page(&[("Members Mixer", "2025-10-10", "Club", "Austin", "community")], None),
    );
    let mut target = target("city", BASE);
    target.auth = Some(AuthConfig {
        login_url: login.to_string(),
        username_selector: "#user".to_string(),
        password_selector: "#pass".to_string(),
        submit_selector: "#go".to_string(),
        username: "ada".to_string(),
        password: "hunter2".to_string(),
    });
    let scraper = scraper(&site);

    scraper
        .scrape(&target, &RetryContext::default(), None)
        .await
        .unwrap();
    scraper
        .scrape(&target, &RetryContext::default(), None)
        .await
        .unwrap();

    assert_eq!(site.visit_count(login), 1);
    assert_eq!(site.visit_count(BASE), 2);
    assert_eq!(
        *site.fills.lock().unwrap(),
        vec![
            ("#user".to_string(), "ada".to_string()),
            ("#pass".to_string(), "hunter2".to_string())
        ]
    );
    assert_eq!(site.contexts_opened.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn captcha_page_discards_the_session() {
    let site = ScriptedSite::new();
    site.page(BASE, r#"<html><body><div class="g-recaptcha"></div></body></html>"#);
    let scraper = scraper(&site);

    let err = scraper
        .scrape(&target("city", BASE), &RetryContext::default(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Captcha);
    assert_eq!(err.url.as_deref(), Some(BASE));
    assert_eq!(site.contexts_closed.load(Ordering::SeqCst), 1);
    assert_eq!(scraper.session_manager().open_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn rotate_identity_hint_opens_a_fresh_session() {
    let site = ScriptedSite::new();
    site.page(
        BASE,
        listing_page(&[("A", "2025-10-10", "Hall", "Austin", "music")], None),
    );
    site.fail_next(BASE, ScrapingError::network("reset by peer"));
    let scraper = scraper(&site);

    assert!(scraper
        .scrape(&target("city", BASE), &RetryContext::default(), None)
        .await
        .is_err());
    let retry = RetryContext {
        attempt: 1,
        rotate_identity: true,
        ..RetryContext::default()
    };
    let outcome = scraper
        .scrape(&target("city", BASE), &retry, None)
        .await
        .unwrap();

    assert_eq!(outcome.events.len(), 1);
    assert_eq!(site.contexts_opened.load(Ordering::SeqCst), 2);
    assert_eq!(site.contexts_closed.load(Ordering::SeqCst), 1);
    assert_eq!(site.launches.load(Ordering::SeqCst), 1);

    scraper.shutdown().await;
    assert_eq!(site.contexts_closed.load(Ordering::SeqCst), 2);
    assert_eq!(site.browsers_closed.load(Ordering::SeqCst), 1);
}
