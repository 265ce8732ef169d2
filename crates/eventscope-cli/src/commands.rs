//! Command handlers called from `main` once configuration is loaded.
//!
//! Per-target failures are reported in the run summary rather than
//! propagated; a run only fails outright when the job cannot be loaded, the
//! output cannot be written, or every target failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eventscope_core::{AppConfig, Job, OutputFormat, OutputSpec, RawEventData};
use eventscope_normalize::{generate_quality_report, EventNormalizer, NormalizerConfig};
use eventscope_scraper::renderer::PageRenderer;
use eventscope_scraper::{
    JobReport, OrchestratorConfig, RecordSink, ScraperOrchestrator, SessionStatus, StaticRenderer,
};

use crate::output::JsonFileSink;

/// The job's output spec with command-line overrides applied.
fn resolve_output(
    job: &Job,
    destination: Option<PathBuf>,
    format: Option<OutputFormat>,
) -> OutputSpec {
    OutputSpec {
        format: format.unwrap_or(job.output.format),
        destination: destination.or_else(|| job.output.destination.clone()),
    }
}

fn describe_targets(job: &Job) -> Vec<String> {
    job.targets
        .iter()
        .map(|t| {
            let fallbacks: Vec<&str> = t.fallbacks.iter().map(|r| r.action.name()).collect();
            format!(
                "{} ({}) {} [fallbacks: {}]",
                t.id,
                t.source,
                t.base_url,
                if fallbacks.is_empty() {
                    "none".to_string()
                } else {
                    fallbacks.join(", ")
                }
            )
        })
        .collect()
}

fn print_summary(report: &JobReport) {
    for target in &report.targets {
        let detail = match (&target.error, target.skipped) {
            (Some(err), _) => err.clone(),
            (None, true) => "skipped by fallback rule".to_string(),
            (None, false) => format!(
                "{} found, {} normalized{}",
                target.events_found,
                target.events_normalized,
                target
                    .fallback_used
                    .as_deref()
                    .map(|f| format!(" (fallback: {f})"))
                    .unwrap_or_default()
            ),
        };
        eprintln!("{:<24} {:<10} {detail}", target.target_id, target.status.to_string());
    }
    eprintln!(
        "kept {} events, {} venues, {} organizers; quality score {:.1}",
        report.records.events.len(),
        report.records.venues.len(),
        report.records.organizers.len(),
        report.quality.quality_score
    );
    for rec in &report.quality.recommendations {
        eprintln!("  [{:?}] {}", rec.priority, rec.message);
    }
}

/// Scrapes every target in the job file and writes the kept records.
///
/// # Errors
///
/// Returns an error if the job cannot be loaded, the renderer cannot be
/// built, the output cannot be written, or no target succeeded.
pub(crate) async fn run_job(
    config: &AppConfig,
    job_path: &Path,
    destination: Option<PathBuf>,
    format: Option<OutputFormat>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let job = eventscope_core::load_job(job_path)?;

    if dry_run {
        println!(
            "dry-run: would scrape {} targets in chunks of {}:",
            job.targets.len(),
            config.concurrency.max(1)
        );
        for line in describe_targets(&job) {
            println!("  {line}");
        }
        return Ok(());
    }

    let renderer: Arc<dyn PageRenderer> = Arc::new(StaticRenderer::new()?);
    let orchestrator =
        ScraperOrchestrator::new(renderer, OrchestratorConfig::from_app_config(config));
    let sink = JsonFileSink::new(&resolve_output(&job, destination, format));

    let report = tokio::select! {
        report = orchestrator.run_job(&job, Some(&sink as &dyn RecordSink)) => report?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; cancelling in-flight sessions");
            orchestrator.shutdown().await;
            anyhow::bail!("interrupted");
        }
    };

    sink.flush().await?;
    print_summary(&report);

    let failed = report
        .targets
        .iter()
        .filter(|t| t.status == SessionStatus::Failed)
        .count();
    if failed == report.targets.len() {
        anyhow::bail!("all {failed} targets failed");
    }
    Ok(())
}

/// Normalizes a file of raw records without scraping.
///
/// # Errors
///
/// Returns an error if the input cannot be read or parsed, or the output
/// cannot be written.
pub(crate) async fn normalize_file(
    config: &AppConfig,
    input: &Path,
    destination: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", input.display()))?;
    let raw: Vec<RawEventData> = serde_json::from_str(&content)?;

    let normalizer = EventNormalizer::new(NormalizerConfig {
        default_timezone: config.default_timezone.clone(),
        ..NormalizerConfig::default()
    });
    let batch = normalizer.normalize_batch(&raw);
    let quality = generate_quality_report(&raw, &batch.events);

    let sink = JsonFileSink::new(&OutputSpec {
        format,
        destination,
    });
    sink.upsert_venues(&batch.venues).await?;
    sink.upsert_organizers(&batch.organizers).await?;
    sink.upsert_events(&batch.events).await?;
    sink.flush().await?;

    eprintln!(
        "normalized {}/{} records; quality score {:.1}",
        quality.valid_records, quality.total_records, quality.quality_score
    );
    for (field, missing) in &quality.missing_fields {
        eprintln!("  missing {field}: {missing}");
    }
    Ok(())
}

/// Loads and validates a job file, printing its targets.
///
/// # Errors
///
/// Returns the validation error for an invalid job.
pub(crate) fn check_job(job_path: &Path) -> anyhow::Result<()> {
    let job = eventscope_core::load_job(job_path)?;
    println!(
        "job {} is valid: {} targets",
        job.id.as_deref().unwrap_or("(unnamed)"),
        job.targets.len()
    );
    for line in describe_targets(&job) {
        println!("  {line}");
    }
    Ok(())
}
