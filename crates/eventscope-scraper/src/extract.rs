//! Field extraction from listing items.
//!
//! Renderers hand back each item as an [`ElementSnapshot`]; fields are then
//! pulled out locally by parsing the item's HTML, so a renderer only has to
//! support `query_selector_all`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use eventscope_core::target::fields;
use eventscope_core::{RawEventData, RawOrganizerData, RawVenueData, ScrapeTarget, SelectorMap};
use scraper::{ElementRef, Html, Selector};

use crate::error::ScrapingError;
use crate::renderer::ElementSnapshot;

/// One field selector, split into the CSS part and an optional attribute.
#[derive(Debug, Clone)]
struct FieldSelector {
    raw: String,
    /// `None` reads from the item element itself.
    css: Option<Selector>,
    attr: Option<String>,
}

impl FieldSelector {
    fn parse(raw: &str) -> Result<Self, ScrapingError> {
        let (css, attr) = match raw.rsplit_once('@') {
            Some((css, attr)) if !attr.trim().is_empty() => {
                (css.trim(), Some(attr.trim().to_string()))
            }
            _ => (raw.trim(), None),
        };
        let css = if css.is_empty() {
            None
        } else {
            Some(Selector::parse(css).map_err(|e| {
                ScrapingError::parsing(format!("invalid field selector '{raw}': {e}"))
                    .with_selector(raw)
            })?)
        };
        Ok(Self {
            raw: raw.to_string(),
            css,
            attr,
        })
    }
}

/// A target's field selectors, compiled once per scrape.
#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    fields: HashMap<String, FieldSelector>,
}

impl CompiledSelectors {
    /// # Errors
    ///
    /// Returns a `parsing` error naming the first selector that is not valid
    /// CSS.
    pub fn compile(selectors: &SelectorMap) -> Result<Self, ScrapingError> {
        let mut compiled = HashMap::new();
        for name in selectors.fields.keys() {
            if let Some(raw) = selectors.field(name) {
                compiled.insert(name.clone(), FieldSelector::parse(raw)?);
            }
        }
        Ok(Self { fields: compiled })
    }

    fn get(&self, name: &str) -> Option<&FieldSelector> {
        self.fields.get(name)
    }
}

struct Item<'a> {
    snapshot: &'a ElementSnapshot,
    html: Html,
}

impl Item<'_> {
    fn matches(&self, field: &FieldSelector) -> Vec<ElementRef<'_>> {
        match &field.css {
            Some(css) => self.html.select(css).collect(),
            None => Vec::new(),
        }
    }

    /// All values for a field. Without `@attr`, `default_attr` is read when
    /// present and the element text is used otherwise.
    fn values(&self, field: &FieldSelector, default_attr: Option<&str>) -> Vec<String> {
        if field.css.is_none() {
            return field
                .attr
                .as_deref()
                .and_then(|a| self.snapshot.attributes.get(a))
                .map(|v| vec![v.trim().to_string()])
                .unwrap_or_default();
        }
        self.matches(field)
            .into_iter()
            .filter_map(|el| match field.attr.as_deref() {
                Some(attr) => el.value().attr(attr).map(str::to_string),
                None => default_attr
                    .and_then(|a| el.value().attr(a))
                    .map(str::to_string)
                    .or_else(|| Some(element_text(&el))),
            })
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }

    fn first(&self, field: &FieldSelector, default_attr: Option<&str>) -> Option<String> {
        self.values(field, default_attr).into_iter().next()
    }

    fn inner_html(&self, field: &FieldSelector) -> Option<String> {
        if field.attr.is_some() || field.css.is_none() {
            return self.first(field, None);
        }
        self.matches(field)
            .first()
            .map(ElementRef::inner_html)
            .filter(|h| !h.trim().is_empty())
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pulls one raw event out of a listing item.
///
/// # Errors
///
/// Returns a `parsing` error when the item yields no title; the caller skips
/// the item and keeps going.
pub fn extract_event(
    snapshot: &ElementSnapshot,
    selectors: &CompiledSelectors,
    target: &ScrapeTarget,
    page_url: &str,
    scraped_at: DateTime<Utc>,
) -> Result<RawEventData, ScrapingError> {
    let item = Item {
        snapshot,
        html: Html::parse_fragment(&snapshot.html),
    };
    let text = |name: &str| selectors.get(name).and_then(|f| item.first(f, None));
    let link = |name: &str| selectors.get(name).and_then(|f| item.first(f, Some("href")));

    let title = text(fields::TITLE).ok_or_else(|| {
        ScrapingError::parsing("listing item has no title")
            .with_selector(
                selectors
                    .get(fields::TITLE)
                    .map_or_else(|| "<unset>".to_string(), |f| f.raw.clone()),
            )
            .with_url(page_url)
    })?;

    let venue_name = text(fields::VENUE);
    let venue_address = text(fields::VENUE_ADDRESS);
    let venue_city = text(fields::VENUE_CITY);
    let venue = (venue_name.is_some() || venue_address.is_some() || venue_city.is_some()).then(|| {
        RawVenueData {
            name: venue_name,
            address: venue_address,
            city: venue_city,
            timezone: target.timezone.clone(),
            ..RawVenueData::default()
        }
    });

    let organizer = text(fields::ORGANIZER).map(|name| RawOrganizerData {
        name: Some(name),
        ..RawOrganizerData::default()
    });

    let image_urls = selectors
        .get(fields::IMAGE)
        .map(|f| {
            if f.attr.is_some() {
                item.values(f, None)
            } else {
                item.matches(f)
                    .into_iter()
                    .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
                    .map(str::to_string)
                    .collect()
            }
        })
        .unwrap_or_default();

    let tags = selectors
        .get(fields::CATEGORY)
        .map(|f| item.values(f, None))
        .unwrap_or_default();

    Ok(RawEventData {
        external_id: text(fields::EXTERNAL_ID),
        source: target.source.clone(),
        title: Some(title),
        description: selectors
            .get(fields::DESCRIPTION)
            .and_then(|f| item.inner_html(f)),
        date: text(fields::DATE),
        time: text(fields::TIME),
        end_date: text(fields::END_DATE),
        end_time: text(fields::END_TIME),
        timezone: target.timezone.clone(),
        venue,
        organizer,
        price_text: text(fields::PRICE),
        is_free: None,
        url: link(fields::URL),
        ticket_url: link(fields::TICKET_URL),
        image_urls,
        tags,
        page_url: Some(page_url.to_string()),
        scraped_at,
    })
}

/// Venues referenced by `events`, first occurrence wins, keyed on
/// case-insensitive name and city.
#[must_use]
pub fn unique_venues(events: &[RawEventData]) -> Vec<RawVenueData> {
    let mut seen = std::collections::HashSet::new();
    events
        .iter()
        .filter_map(|e| e.venue.as_ref())
        .filter(|v| v.name.as_deref().is_some_and(|n| !n.trim().is_empty()))
        .filter(|v| {
            let key = (
                v.name.as_deref().unwrap_or("").trim().to_lowercase(),
                v.city.as_deref().unwrap_or("").trim().to_lowercase(),
            );
            seen.insert(key)
        })
        .cloned()
        .collect()
}
