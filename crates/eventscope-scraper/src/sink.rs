//! Destinations for canonical records.
//!
//! Every upsert is idempotent on `(external_id, source)`: writing the same
//! record twice leaves one copy, and a later write replaces an earlier one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use eventscope_core::{NormalizedEvent, NormalizedOrganizer, NormalizedVenue};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink rejected batch: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Returns the number of records written.
    async fn upsert_events(&self, events: &[NormalizedEvent]) -> Result<usize, SinkError>;

    async fn upsert_venues(&self, venues: &[NormalizedVenue]) -> Result<usize, SinkError>;

    async fn upsert_organizers(
        &self,
        organizers: &[NormalizedOrganizer],
    ) -> Result<usize, SinkError>;
}

type RecordKey = (String, String);

/// In-process sink keyed on `(external_id, source)`.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<BTreeMap<RecordKey, NormalizedEvent>>,
    venues: Mutex<BTreeMap<RecordKey, NormalizedVenue>>,
    organizers: Mutex<BTreeMap<RecordKey, NormalizedOrganizer>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events ordered by key.
    pub async fn events(&self) -> Vec<NormalizedEvent> {
        self.events.lock().await.values().cloned().collect()
    }

    pub async fn venues(&self) -> Vec<NormalizedVenue> {
        self.venues.lock().await.values().cloned().collect()
    }

    pub async fn organizers(&self) -> Vec<NormalizedOrganizer> {
        self.organizers.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert_events(&self, events: &[NormalizedEvent]) -> Result<usize, SinkError> {
        let mut stored = self.events.lock().await;
        for event in events {
            stored.insert(
                (event.external_id.clone(), event.source.clone()),
                event.clone(),
            );
        }
        Ok(events.len())
    }

    async fn upsert_venues(&self, venues: &[NormalizedVenue]) -> Result<usize, SinkError> {
        let mut stored = self.venues.lock().await;
        for venue in venues {
            stored.insert(
                (venue.external_id.clone(), venue.source.clone()),
                venue.clone(),
            );
        }
        Ok(venues.len())
    }

    async fn upsert_organizers(
        &self,
        organizers: &[NormalizedOrganizer],
    ) -> Result<usize, SinkError> {
        let mut stored = self.organizers.lock().await;
        for organizer in organizers {
            stored.insert(
                (organizer.external_id.clone(), organizer.source.clone()),
                organizer.clone(),
            );
        }
        Ok(organizers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(id: &str, source: &str, name: &str) -> NormalizedVenue {
        NormalizedVenue {
            external_id: id.to_string(),
            source: source.to_string(),
            name: name.to_string(),
            address: None,
            city: None,
            region: None,
            country: None,
            postal_code: None,
            url: None,
            timezone: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_id_and_source() {
        let sink = MemorySink::new();
        sink.upsert_venues(&[venue("v1", "a", "Old"), venue("v1", "b", "Other source")])
            .await
            .unwrap();
        sink.upsert_venues(&[venue("v1", "a", "New")]).await.unwrap();

        let venues = sink.venues().await;
        assert_eq!(venues.len(), 2);
        assert_eq!(venues[0].name, "New");
        assert_eq!(venues[1].source, "b");
    }
}
