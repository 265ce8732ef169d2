//! Stable external ids for sources that do not publish their own.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// SHA-256 over `source || title || start || venue`, with title and venue
/// trimmed and lower-cased. Hex-encoded.
#[must_use]
pub fn event_external_id(source: &str, title: &str, start: DateTime<Utc>, venue: &str) -> String {
    let input = format!(
        "{}\x00{}\x00{}\x00{}",
        source.trim(),
        title.trim().to_lowercase(),
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        venue.trim().to_lowercase(),
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[must_use]
pub fn venue_external_id(source: &str, name: &str, city: Option<&str>) -> String {
    let input = format!(
        "venue\x00{}\x00{}\x00{}",
        source.trim(),
        name.trim().to_lowercase(),
        city.unwrap_or("").trim().to_lowercase(),
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[must_use]
pub fn organizer_external_id(source: &str, name: &str) -> String {
    let input = format!(
        "organizer\x00{}\x00{}",
        source.trim(),
        name.trim().to_lowercase()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
