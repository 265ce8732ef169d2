//! Pure raw-to-canonical transform for scraped event listings.
//!
//! Nothing in this crate performs I/O or reads the clock, so normalizing the
//! same raw batch twice produces identical output.

pub mod category;
pub mod dates;
pub mod ids;
pub mod normalizer;
pub mod price;
pub mod quality;
pub mod text;
pub mod urls;

pub use category::categorize;
pub use normalizer::{EventNormalizer, NormalizedBatch, NormalizerConfig, Rejection, UNKNOWN_VENUE};
pub use price::{parse_price, PriceInfo};
pub use quality::{
    generate_quality_report, DataQualityReport, Recommendation, RecommendationPriority,
};
