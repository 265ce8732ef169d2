//! Raw-to-canonical event normalization.
//!
//! [`EventNormalizer`] is a pure transform: the same raw record always yields
//! the same canonical record. Nothing reads the clock; `last_updated` and the
//! year for undated listings both come from the record's `scraped_at`.

use std::collections::HashSet;

use chrono::Datelike;
use chrono_tz::Tz;
use eventscope_core::{
    NormalizedEvent, NormalizedOrganizer, NormalizedVenue, RawEventData, RawOrganizerData,
    RawVenueData,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::category::categorize;
use crate::dates::{parse_datetime, parse_end_datetime, parse_timezone};
use crate::ids::{event_external_id, organizer_external_id, venue_external_id};
use crate::price::parse_price;
use crate::text::{clean_line, clean_text, truncate_chars};
use crate::urls::{has_allowed_extension, normalize_url, DEFAULT_IMAGE_EXTENSIONS};

/// Venue placeholder used by lenient normalization when a listing names none.
pub const UNKNOWN_VENUE: &str = "TBA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Reject rather than repair records that fail the validation gate.
    pub strict: bool,
    pub max_title_length: usize,
    /// IANA zone used when neither the record nor its venue declares one.
    pub default_timezone: String,
    pub default_currency: String,
    pub allowed_image_extensions: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            strict: true,
            max_title_length: 200,
            default_timezone: "UTC".to_string(),
            default_currency: "USD".to_string(),
            allowed_image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

/// Why a raw record failed the validation gate. Rejections are final; the
/// record is dropped, not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingTitle,
    TitleTooLong { length: usize, max: usize },
    MissingStartDate,
    UnparseableStartDate(String),
    MissingVenue,
}

impl Rejection {
    /// The raw field responsible, as used in quality report histograms.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Rejection::MissingTitle | Rejection::TitleTooLong { .. } => "title",
            Rejection::MissingStartDate | Rejection::UnparseableStartDate(_) => "date",
            Rejection::MissingVenue => "venue",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingTitle => write!(f, "missing title"),
            Rejection::TitleTooLong { length, max } => {
                write!(f, "title is {length} characters; limit is {max}")
            }
            Rejection::MissingStartDate => write!(f, "missing start date"),
            Rejection::UnparseableStartDate(raw) => write!(f, "unparseable start date '{raw}'"),
            Rejection::MissingVenue => write!(f, "missing venue name"),
        }
    }
}

/// Canonical records produced from one raw batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBatch {
    pub events: Vec<NormalizedEvent>,
    pub venues: Vec<NormalizedVenue>,
    pub organizers: Vec<NormalizedOrganizer>,
}

#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    config: NormalizerConfig,
    default_tz: Option<Tz>,
}

impl EventNormalizer {
    #[must_use]
    pub fn new(config: NormalizerConfig) -> Self {
        let default_tz = parse_timezone(&config.default_timezone);
        if default_tz.is_none() {
            tracing::warn!(
                timezone = %config.default_timezone,
                "unknown default timezone; falling back to UTC"
            );
        }
        Self { config, default_tz }
    }

    #[must_use]
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalizes one record, or `None` when it fails the validation gate.
    #[must_use]
    pub fn normalize_event(&self, raw: &RawEventData) -> Option<NormalizedEvent> {
        match self.try_normalize_event(raw) {
            Ok(event) => Some(event),
            Err(rejection) => {
                tracing::debug!(
                    source = %raw.source,
                    title = raw.title.as_deref().unwrap_or(""),
                    reason = %rejection,
                    "dropping raw event"
                );
                None
            }
        }
    }

    /// Like [`Self::normalize_event`] but reports why a record was dropped.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] for records without a usable title, start
    /// date, or (in strict mode) venue name, and for over-long titles in
    /// strict mode.
    pub fn try_normalize_event(&self, raw: &RawEventData) -> Result<NormalizedEvent, Rejection> {
        let title = raw
            .title
            .as_deref()
            .and_then(clean_line)
            .ok_or(Rejection::MissingTitle)?;
        let title_len = title.chars().count();
        let title = if title_len > self.config.max_title_length {
            if self.config.strict {
                return Err(Rejection::TitleTooLong {
                    length: title_len,
                    max: self.config.max_title_length,
                });
            }
            truncate_chars(&title, self.config.max_title_length)
        } else {
            title
        };

        let venue_name = match raw
            .venue
            .as_ref()
            .and_then(|v| v.name.as_deref())
            .and_then(clean_line)
        {
            Some(name) => name,
            None if self.config.strict => return Err(Rejection::MissingVenue),
            None => UNKNOWN_VENUE.to_string(),
        };

        let tz = self.resolve_timezone(raw);
        let reference_year = raw.scraped_at.with_timezone(&tz).year();
        let date = raw
            .date
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(Rejection::MissingStartDate)?;
        let start_time = parse_datetime(date, raw.time.as_deref(), tz, reference_year)
            .ok_or_else(|| Rejection::UnparseableStartDate(date.to_string()))?;
        let end_time = parse_end_datetime(
            start_time,
            date,
            raw.end_date.as_deref(),
            raw.end_time.as_deref(),
            tz,
            reference_year,
        );

        let description = raw.description.as_deref().and_then(clean_text);
        let tags = clean_tags(&raw.tags);
        let category = categorize(&tags, &title, description.as_deref());
        let price = parse_price(
            raw.price_text.as_deref(),
            raw.is_free,
            &self.config.default_currency,
        );

        let base = raw.page_url.as_deref().and_then(|u| Url::parse(u).ok());
        let event_url = raw
            .url
            .as_deref()
            .and_then(|u| normalize_url(u, base.as_ref()));
        let ticket_url = raw
            .ticket_url
            .as_deref()
            .and_then(|u| normalize_url(u, base.as_ref()));
        let image_url = raw
            .image_urls
            .iter()
            .filter_map(|u| normalize_url(u, base.as_ref()))
            .find(|u| has_allowed_extension(u, &self.config.allowed_image_extensions));

        let venue_external_id = raw
            .venue
            .as_ref()
            .and_then(|v| self.normalize_venue(v, &raw.source))
            .map(|v| v.external_id);
        let organizer_name = raw
            .organizer
            .as_ref()
            .and_then(|o| o.name.as_deref())
            .and_then(clean_line);

        let external_id = raw
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(
                || event_external_id(&raw.source, &title, start_time, &venue_name),
                str::to_string,
            );

        Ok(NormalizedEvent {
            external_id,
            source: raw.source.clone(),
            title,
            description,
            start_time,
            end_time,
            timezone: tz.name().to_string(),
            category,
            price_min: price.min,
            price_max: price.max,
            currency: price.currency,
            is_free: price.is_free,
            event_url,
            ticket_url,
            image_url,
            venue_name,
            venue_external_id,
            organizer_name,
            tags,
            last_updated: raw.scraped_at,
        })
    }

    /// Normalizes a venue. A venue needs a name; everything else is optional.
    #[must_use]
    pub fn normalize_venue(&self, raw: &RawVenueData, source: &str) -> Option<NormalizedVenue> {
        let name = raw.name.as_deref().and_then(clean_line)?;
        let city = raw.city.as_deref().and_then(clean_line);
        let external_id = raw
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(
                || venue_external_id(source, &name, city.as_deref()),
                str::to_string,
            );
        Some(NormalizedVenue {
            external_id,
            source: source.to_string(),
            name,
            address: raw.address.as_deref().and_then(clean_line),
            city,
            region: raw.region.as_deref().and_then(clean_line),
            country: raw.country.as_deref().and_then(clean_line),
            postal_code: raw.postal_code.as_deref().and_then(clean_line),
            url: raw.url.as_deref().and_then(|u| normalize_url(u, None)),
            timezone: raw
                .timezone
                .as_deref()
                .and_then(parse_timezone)
                .map(|tz| tz.name().to_string()),
        })
    }

    #[must_use]
    pub fn normalize_organizer(
        &self,
        raw: &RawOrganizerData,
        source: &str,
    ) -> Option<NormalizedOrganizer> {
        let name = raw.name.as_deref().and_then(clean_line)?;
        let external_id = raw
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| organizer_external_id(source, &name), str::to_string);
        Some(NormalizedOrganizer {
            external_id,
            source: source.to_string(),
            name,
            url: raw.url.as_deref().and_then(|u| normalize_url(u, None)),
        })
    }

    /// Normalizes a batch, de-duplicating every record kind on
    /// `(external_id, source)` with the first occurrence winning.
    #[must_use]
    pub fn normalize_batch(&self, raws: &[RawEventData]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut seen_events = HashSet::new();
        let mut seen_venues = HashSet::new();
        let mut seen_organizers = HashSet::new();

        for raw in raws {
            if let Some(event) = self.normalize_event(raw) {
                if seen_events.insert((event.external_id.clone(), event.source.clone())) {
                    batch.events.push(event);
                }
            }
            if let Some(venue) = raw
                .venue
                .as_ref()
                .and_then(|v| self.normalize_venue(v, &raw.source))
            {
                if seen_venues.insert((venue.external_id.clone(), venue.source.clone())) {
                    batch.venues.push(venue);
                }
            }
            if let Some(organizer) = raw
                .organizer
                .as_ref()
                .and_then(|o| self.normalize_organizer(o, &raw.source))
            {
                if seen_organizers.insert((organizer.external_id.clone(), organizer.source.clone()))
                {
                    batch.organizers.push(organizer);
                }
            }
        }

        batch
    }

    /// Record zone, then venue zone, then the configured default.
    fn resolve_timezone(&self, raw: &RawEventData) -> Tz {
        raw.timezone
            .as_deref()
            .and_then(parse_timezone)
            .or_else(|| {
                raw.venue
                    .as_ref()
                    .and_then(|v| v.timezone.as_deref())
                    .and_then(parse_timezone)
            })
            .or(self.default_tz)
            .unwrap_or(Tz::UTC)
    }
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter_map(|t| clean_line(t))
        .map(|t| t.to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
#[path = "normalizer_test.rs"]
mod tests;
