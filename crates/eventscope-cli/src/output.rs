//! File and stdout sink for normalized records.
//!
//! Upserts are buffered and keyed on `(external_id, source)`; nothing is
//! written until [`JsonFileSink::flush`], so a failed job leaves no partial
//! output file behind.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use eventscope_core::{
    NormalizedEvent, NormalizedOrganizer, NormalizedVenue, OutputFormat, OutputSpec,
};
use eventscope_scraper::{RecordSink, SinkError};
use serde::Serialize;
use tokio::sync::Mutex;

type RecordKey = (String, String);

#[derive(Debug, Default)]
struct Buffered {
    events: BTreeMap<RecordKey, NormalizedEvent>,
    venues: BTreeMap<RecordKey, NormalizedVenue>,
    organizers: BTreeMap<RecordKey, NormalizedOrganizer>,
}

#[derive(Debug, Serialize)]
struct Document<'a> {
    events: Vec<&'a NormalizedEvent>,
    venues: Vec<&'a NormalizedVenue>,
    organizers: Vec<&'a NormalizedOrganizer>,
}

/// One NDJSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "record", rename_all = "lowercase")]
enum Line<'a> {
    Event(&'a NormalizedEvent),
    Venue(&'a NormalizedVenue),
    Organizer(&'a NormalizedOrganizer),
}

#[derive(Debug)]
pub(crate) struct JsonFileSink {
    format: OutputFormat,
    destination: Option<PathBuf>,
    buffered: Mutex<Buffered>,
}

impl JsonFileSink {
    pub(crate) fn new(spec: &OutputSpec) -> Self {
        Self {
            format: spec.format,
            destination: spec.destination.clone(),
            buffered: Mutex::new(Buffered::default()),
        }
    }

    /// Renders everything buffered so far.
    pub(crate) async fn render(&self) -> Result<String, SinkError> {
        let buffered = self.buffered.lock().await;
        match self.format {
            OutputFormat::Json => {
                let document = Document {
                    events: buffered.events.values().collect(),
                    venues: buffered.venues.values().collect(),
                    organizers: buffered.organizers.values().collect(),
                };
                let mut rendered = serde_json::to_string_pretty(&document)?;
                rendered.push('\n');
                Ok(rendered)
            }
            OutputFormat::Ndjson => {
                let lines = buffered
                    .venues
                    .values()
                    .map(Line::Venue)
                    .chain(buffered.organizers.values().map(Line::Organizer))
                    .chain(buffered.events.values().map(Line::Event));
                let mut rendered = String::new();
                for line in lines {
                    rendered.push_str(&serde_json::to_string(&line)?);
                    rendered.push('\n');
                }
                Ok(rendered)
            }
        }
    }

    /// Writes the buffered records to the destination file, or stdout.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the destination cannot be written.
    pub(crate) async fn flush(&self) -> Result<(), SinkError> {
        let rendered = self.render().await?;
        match &self.destination {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, rendered).await?;
                tracing::info!(path = %path.display(), format = %self.format, "records written");
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(rendered.as_bytes())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSink for JsonFileSink {
    async fn upsert_events(&self, events: &[NormalizedEvent]) -> Result<usize, SinkError> {
        let mut buffered = self.buffered.lock().await;
        for event in events {
            buffered
                .events
                .insert((event.external_id.clone(), event.source.clone()), event.clone());
        }
        Ok(events.len())
    }

    async fn upsert_venues(&self, venues: &[NormalizedVenue]) -> Result<usize, SinkError> {
        let mut buffered = self.buffered.lock().await;
        for venue in venues {
            buffered
                .venues
                .insert((venue.external_id.clone(), venue.source.clone()), venue.clone());
        }
        Ok(venues.len())
    }

    async fn upsert_organizers(
        &self,
        organizers: &[NormalizedOrganizer],
    ) -> Result<usize, SinkError> {
        let mut buffered = self.buffered.lock().await;
        for organizer in organizers {
            buffered.organizers.insert(
                (organizer.external_id.clone(), organizer.source.clone()),
                organizer.clone(),
            );
        }
        Ok(organizers.len())
    }
}
