use std::str::FromStr;

use chrono::{TimeZone, Utc};
use eventscope_core::EventCategory;
use rust_decimal::Decimal;

use super::*;

fn scraped_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap()
}

fn raw_event() -> RawEventData {
    RawEventData {
        source: "cityguide".to_string(),
        title: Some("  Late Night <b>Jazz</b> &amp; Blues ".to_string()),
        description: Some("<p>Two sets.</p><p>Cash bar &amp; food.</p>".to_string()),
        date: Some("2025-10-20".to_string()),
        time: Some("8:00 PM".to_string()),
        venue: Some(RawVenueData {
            name: Some("Blue Room".to_string()),
            city: Some("Austin".to_string()),
            timezone: Some("America/Chicago".to_string()),
            ..RawVenueData::default()
        }),
        price_text: Some("$20 - $50".to_string()),
        url: Some("/events/42".to_string()),
        image_urls: vec![
            "/img/poster.svg".to_string(),
            "//cdn.example.com/poster.jpg".to_string(),
        ],
        tags: vec!["Jazz".to_string(), "jazz".to_string()],
        page_url: Some("https://example.com/events".to_string()),
        scraped_at: scraped_at(),
        ..RawEventData::default()
    }
}

fn normalizer() -> EventNormalizer {
    EventNormalizer::new(NormalizerConfig::default())
}

#[test]
fn normalizes_complete_record() {
    let event = normalizer().normalize_event(&raw_event()).unwrap();
    assert_eq!(event.title, "Late Night Jazz & Blues");
    assert_eq!(event.description.as_deref(), Some("Two sets.\nCash bar & food."));
    // 8 PM CDT is 01:00 UTC the next day.
    assert_eq!(event.start_time.to_rfc3339(), "2025-10-21T01:00:00+00:00");
    assert_eq!(event.timezone, "America/Chicago");
    assert_eq!(event.category, EventCategory::Music);
    assert_eq!(event.price_min, Some(Decimal::from(20)));
    assert_eq!(event.price_max, Some(Decimal::from(50)));
    assert_eq!(event.currency.as_deref(), Some("USD"));
    assert!(!event.is_free);
    assert_eq!(event.event_url.as_deref(), Some("https://example.com/events/42"));
    assert_eq!(
        event.image_url.as_deref(),
        Some("https://cdn.example.com/poster.jpg")
    );
    assert_eq!(event.venue_name, "Blue Room");
    assert!(event.venue_external_id.is_some());
    assert_eq!(event.tags, vec!["jazz".to_string()]);
    assert_eq!(event.last_updated, scraped_at());
    assert_eq!(event.external_id.len(), 64);
}

#[test]
fn empty_title_is_dropped() {
    let raw = RawEventData {
        title: Some(String::new()),
        date: Some("2025-10-20".to_string()),
        venue: Some(RawVenueData {
            name: Some("X".to_string()),
            ..RawVenueData::default()
        }),
        scraped_at: scraped_at(),
        ..RawEventData::default()
    };
    assert!(normalizer().normalize_event(&raw).is_none());
    assert_eq!(
        normalizer().try_normalize_event(&raw),
        Err(Rejection::MissingTitle)
    );
}

#[test]
fn missing_date_and_venue_are_dropped() {
    let mut raw = raw_event();
    raw.date = None;
    assert_eq!(
        normalizer().try_normalize_event(&raw),
        Err(Rejection::MissingStartDate)
    );

    let mut raw = raw_event();
    raw.venue = None;
    assert_eq!(
        normalizer().try_normalize_event(&raw),
        Err(Rejection::MissingVenue)
    );

    let mut raw = raw_event();
    raw.date = Some("TBA".to_string());
    assert!(matches!(
        normalizer().try_normalize_event(&raw),
        Err(Rejection::UnparseableStartDate(_))
    ));
}

#[test]
fn lenient_mode_repairs_title_and_venue() {
    let lenient = EventNormalizer::new(NormalizerConfig {
        strict: false,
        max_title_length: 10,
        ..NormalizerConfig::default()
    });
    let mut raw = raw_event();
    raw.venue = None;
    let event = lenient.normalize_event(&raw).unwrap();
    assert_eq!(event.title, "Late Night");
    assert_eq!(event.venue_name, UNKNOWN_VENUE);

    let strict = EventNormalizer::new(NormalizerConfig {
        max_title_length: 10,
        ..NormalizerConfig::default()
    });
    assert!(matches!(
        strict.try_normalize_event(&raw_event()),
        Err(Rejection::TitleTooLong { max: 10, .. })
    ));
}

#[test]
fn normalization_is_idempotent() {
    let n = normalizer();
    let first = serde_json::to_string(&n.normalize_event(&raw_event())).unwrap();
    let second = serde_json::to_string(&n.normalize_event(&raw_event())).unwrap();
    assert_eq!(first, second);
}

#[test]
fn free_price_text() {
    let mut raw = raw_event();
    raw.price_text = Some("Free".to_string());
    let event = normalizer().normalize_event(&raw).unwrap();
    assert_eq!(event.price_min, Some(Decimal::ZERO));
    assert_eq!(event.price_max, Some(Decimal::ZERO));
    assert!(event.is_free);
}

#[test]
fn explicit_external_id_is_kept() {
    let mut raw = raw_event();
    raw.external_id = Some(" evt-42 ".to_string());
    let event = normalizer().normalize_event(&raw).unwrap();
    assert_eq!(event.external_id, "evt-42");
}

#[test]
fn yearless_date_takes_year_from_scraped_at() {
    let mut raw = raw_event();
    raw.date = Some("Mon, Oct 20".to_string());
    raw.time = None;
    raw.venue.as_mut().unwrap().timezone = None;
    let event = normalizer().normalize_event(&raw).unwrap();
    assert_eq!(event.start_time.to_rfc3339(), "2025-10-20T00:00:00+00:00");
    assert_eq!(event.timezone, "UTC");
}

#[test]
fn record_timezone_beats_venue_and_default() {
    let n = EventNormalizer::new(NormalizerConfig {
        default_timezone: "Asia/Tokyo".to_string(),
        ..NormalizerConfig::default()
    });
    let mut raw = raw_event();
    raw.timezone = Some("Europe/Paris".to_string());
    assert_eq!(n.normalize_event(&raw).unwrap().timezone, "Europe/Paris");

    raw.timezone = None;
    raw.venue.as_mut().unwrap().timezone = None;
    assert_eq!(n.normalize_event(&raw).unwrap().timezone, "Asia/Tokyo");
}

#[test]
fn normalize_venue_requires_name() {
    let n = normalizer();
    assert!(n
        .normalize_venue(&RawVenueData::default(), "cityguide")
        .is_none());
    let venue = n
        .normalize_venue(
            &RawVenueData {
                name: Some(" The &amp; Hall ".to_string()),
                url: Some("www.thehall.test".to_string()),
                timezone: Some("Nowhere/Land".to_string()),
                ..RawVenueData::default()
            },
            "cityguide",
        )
        .unwrap();
    assert_eq!(venue.name, "The & Hall");
    assert_eq!(venue.url.as_deref(), Some("https://www.thehall.test/"));
    assert_eq!(venue.timezone, None);
}

#[test]
fn normalize_organizer_derives_id() {
    let org = normalizer()
        .normalize_organizer(
            &RawOrganizerData {
                name: Some("Promoter Co".to_string()),
                ..RawOrganizerData::default()
            },
            "cityguide",
        )
        .unwrap();
    assert_eq!(org.external_id.len(), 64);
    assert_eq!(org.source, "cityguide");
}

#[test]
fn batch_deduplicates_on_external_id() {
    let mut second = raw_event();
    second.organizer = Some(RawOrganizerData {
        name: Some("Promoter Co".to_string()),
        ..RawOrganizerData::default()
    });
    let mut invalid = raw_event();
    invalid.title = None;

    let batch = normalizer().normalize_batch(&[raw_event(), second, invalid]);
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.venues.len(), 1);
    assert_eq!(batch.organizers.len(), 1);
}

#[test]
fn decimal_prices_survive() {
    let mut raw = raw_event();
    raw.price_text = Some("\u{20ac}12.50".to_string());
    let event = normalizer().normalize_event(&raw).unwrap();
    assert_eq!(event.price_min, Some(Decimal::from_str("12.50").unwrap()));
    assert_eq!(event.currency.as_deref(), Some("EUR"));
}
