//! Batch-level data quality scoring.

use std::collections::BTreeMap;

use eventscope_core::{NormalizedEvent, RawEventData};
use serde::{Deserialize, Serialize};

/// Fields whose absence drops a record outright.
const REQUIRED_FIELDS: &[&str] = &["title", "date", "venue"];

/// Below this score the report recommends reviewing the whole selector map.
const LOW_QUALITY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    /// Raw field the fix targets, if it is field-specific.
    pub field: Option<String>,
    pub affected_records: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    /// Raw field name to number of records where it was absent or blank.
    pub missing_fields: BTreeMap<String, usize>,
    /// `valid_records / total_records`; 0.0 for an empty batch.
    pub quality_score: f64,
    /// Most impactful fix first.
    pub recommendations: Vec<Recommendation>,
    /// Sources a fallback rule deliberately skipped. Their zero record count
    /// is not evidence of a healthy empty listing.
    #[serde(default)]
    pub skipped_sources: Vec<String>,
}

impl DataQualityReport {
    /// Attaches sources that were skipped by a fallback rule.
    #[must_use]
    pub fn with_skipped_sources(mut self, mut sources: Vec<String>) -> Self {
        sources.sort();
        sources.dedup();
        for source in &sources {
            self.recommendations.push(Recommendation {
                priority: RecommendationPriority::Medium,
                field: None,
                affected_records: 0,
                message: format!(
                    "source '{source}' was skipped by a fallback rule; verify it is still reachable"
                ),
            });
        }
        self.skipped_sources = sources;
        rank(&mut self.recommendations);
        self
    }
}

/// Scores a normalization batch.
///
/// `normalized` is the output of normalizing `raw`; records that were
/// de-duplicated count as valid only once.
#[must_use]
pub fn generate_quality_report(
    raw: &[RawEventData],
    normalized: &[NormalizedEvent],
) -> DataQualityReport {
    let total_records = raw.len();
    let valid_records = normalized.len().min(total_records);
    let invalid_records = total_records - valid_records;

    let mut missing_fields: BTreeMap<String, usize> = BTreeMap::new();
    for record in raw {
        for field in missing_in(record) {
            *missing_fields.entry(field.to_string()).or_default() += 1;
        }
    }

    // Counts are bounded by the batch length; f64 holds them exactly.
    #[allow(clippy::cast_precision_loss)]
    let quality_score = if total_records == 0 {
        0.0
    } else {
        valid_records as f64 / total_records as f64
    };

    let mut recommendations: Vec<Recommendation> = missing_fields
        .iter()
        .map(|(field, &count)| field_recommendation(field, count, total_records))
        .collect();

    if total_records > 0 && quality_score < LOW_QUALITY_THRESHOLD {
        recommendations.push(Recommendation {
            priority: RecommendationPriority::High,
            field: None,
            affected_records: invalid_records,
            message: format!(
                "only {valid_records} of {total_records} records were valid; the listing markup has likely changed"
            ),
        });
    }
    rank(&mut recommendations);

    DataQualityReport {
        total_records,
        valid_records,
        invalid_records,
        missing_fields,
        quality_score,
        recommendations,
        skipped_sources: Vec::new(),
    }
}

fn missing_in(record: &RawEventData) -> Vec<&'static str> {
    fn blank(value: Option<&String>) -> bool {
        value.map_or(true, |v| v.trim().is_empty())
    }

    let mut missing = Vec::new();
    if blank(record.title.as_ref()) {
        missing.push("title");
    }
    if blank(record.date.as_ref()) {
        missing.push("date");
    }
    if blank(record.time.as_ref()) {
        missing.push("time");
    }
    if record.venue.as_ref().map_or(true, |v| blank(v.name.as_ref())) {
        missing.push("venue");
    }
    if blank(record.description.as_ref()) {
        missing.push("description");
    }
    if blank(record.price_text.as_ref()) && record.is_free.is_none() {
        missing.push("price");
    }
    if blank(record.url.as_ref()) {
        missing.push("url");
    }
    if record.image_urls.iter().all(|u| u.trim().is_empty()) {
        missing.push("image");
    }
    missing
}

fn field_recommendation(field: &str, count: usize, total: usize) -> Recommendation {
    let priority = if REQUIRED_FIELDS.contains(&field) {
        RecommendationPriority::High
    } else if count * 2 >= total {
        RecommendationPriority::Medium
    } else {
        RecommendationPriority::Low
    };
    let message = if REQUIRED_FIELDS.contains(&field) {
        format!(
            "'{field}' missing in {count} of {total} records; each one was dropped, \
             fix the '{field}' selector"
        )
    } else {
        format!("'{field}' missing in {count} of {total} records; review the '{field}' selector")
    };
    Recommendation {
        priority,
        field: Some(field.to_string()),
        affected_records: count,
        message,
    }
}

fn rank(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.affected_records.cmp(&a.affected_records))
            .then_with(|| a.field.cmp(&b.field))
    });
}
