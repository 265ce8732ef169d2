//! Raw (source-shaped) and canonical record types.
//!
//! Raw records come straight out of page extraction and are only ever
//! consumed by the normalizer. Canonical records are the only shapes handed
//! to the persistence collaborator, keyed on `(external_id, source)`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An event listing as extracted from a rendered page. Every field is text
/// exactly as the source printed it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEventData {
    pub external_id: Option<String>,
    pub source: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub end_date: Option<String>,
    pub end_time: Option<String>,
    /// IANA timezone declared by the source, if any.
    pub timezone: Option<String>,
    pub venue: Option<RawVenueData>,
    pub organizer: Option<RawOrganizerData>,
    pub price_text: Option<String>,
    /// Explicit free-entry marker; short-circuits price parsing when `true`.
    pub is_free: Option<bool>,
    pub url: Option<String>,
    pub ticket_url: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Page the record was extracted from; base for relative links.
    pub page_url: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVenueData {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub url: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrganizerData {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Music,
    Comedy,
    Theater,
    Film,
    Arts,
    Sports,
    FoodAndDrink,
    Nightlife,
    Family,
    Festival,
    Education,
    Community,
    Other,
}

impl EventCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::Music => "music",
            EventCategory::Comedy => "comedy",
            EventCategory::Theater => "theater",
            EventCategory::Film => "film",
            EventCategory::Arts => "arts",
            EventCategory::Sports => "sports",
            EventCategory::FoodAndDrink => "food_and_drink",
            EventCategory::Nightlife => "nightlife",
            EventCategory::Family => "family",
            EventCategory::Festival => "festival",
            EventCategory::Education => "education",
            EventCategory::Community => "community",
            EventCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_ascii_lowercase().as_str() {
            "music" => EventCategory::Music,
            "comedy" => EventCategory::Comedy,
            "theater" | "theatre" => EventCategory::Theater,
            "film" => EventCategory::Film,
            "arts" => EventCategory::Arts,
            "sports" => EventCategory::Sports,
            "food_and_drink" => EventCategory::FoodAndDrink,
            "nightlife" => EventCategory::Nightlife,
            "family" => EventCategory::Family,
            "festival" => EventCategory::Festival,
            "education" => EventCategory::Education,
            "community" => EventCategory::Community,
            "other" => EventCategory::Other,
            other => return Err(format!("unknown event category '{other}'")),
        };
        Ok(category)
    }
}

/// Canonical event, safe to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub external_id: String,
    pub source: String,
    pub title: String,
    /// Plain text; HTML tags and entities removed.
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// IANA timezone the local times were interpreted in.
    pub timezone: String,
    pub category: EventCategory,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    /// ISO 4217 code, absent for free events and unpriced listings.
    pub currency: Option<String>,
    pub is_free: bool,
    pub event_url: Option<String>,
    pub ticket_url: Option<String>,
    pub image_url: Option<String>,
    pub venue_name: String,
    pub venue_external_id: Option<String>,
    pub organizer_name: Option<String>,
    pub tags: Vec<String>,
    /// Copied from the raw record's `scraped_at`, never the wall clock.
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVenue {
    pub external_id: String,
    pub source: String,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub url: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrganizer {
    pub external_id: String,
    pub source: String,
    pub name: String,
    pub url: Option<String>,
}
