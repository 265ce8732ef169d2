//! Fallback chains for failed or empty scrapes.
//!
//! A target's rules are matched against the primary attempt's result in
//! declared order. The first rule whose action yields events (or a
//! deliberate skip) wins; actions that come back empty fall through to the
//! next matching rule.

use std::future::Future;
use std::time::Duration;

use eventscope_core::{FallbackAction, FallbackRule, FallbackTrigger, ScrapeTarget};

use crate::error::{EngineError, ErrorKind};
use crate::target::ScrapeOutcome;

/// Whether `trigger` applies to a scrape `result`.
#[must_use]
pub fn trigger_matches(
    trigger: FallbackTrigger,
    result: &Result<ScrapeOutcome, EngineError>,
) -> bool {
    match (trigger, result) {
        (FallbackTrigger::EmptyResults, Ok(outcome)) => outcome.is_empty() && !outcome.skipped,
        (_, Ok(_)) | (FallbackTrigger::EmptyResults, Err(_)) => false,
        (FallbackTrigger::GenericError, Err(_)) => true,
        (FallbackTrigger::RateLimited, Err(e)) => e.kind() == Some(ErrorKind::RateLimit),
        (FallbackTrigger::Blocked, Err(e)) => {
            matches!(e.kind(), Some(ErrorKind::Blocked | ErrorKind::Captcha))
        }
    }
}

fn is_final(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::CircuitBreakerTripped { .. } | EngineError::Cancelled { .. }
    )
}

/// Runs `run` for `target`, then walks `rules` if the result calls for it.
///
/// Circuit-breaker rejections and cancellations are returned as-is; no
/// fallback can help with either.
///
/// # Errors
///
/// Returns the primary attempt's error when no rule recovers.
pub async fn execute_with_fallbacks<F, Fut>(
    rules: &[FallbackRule],
    target: &ScrapeTarget,
    run: F,
) -> Result<ScrapeOutcome, EngineError>
where
    F: Fn(ScrapeTarget) -> Fut,
    Fut: Future<Output = Result<ScrapeOutcome, EngineError>>,
{
    let primary = run(target.clone()).await;
    match &primary {
        Err(e) if is_final(e) => return primary,
        Ok(outcome) if !outcome.is_empty() || outcome.skipped => return primary,
        _ => {}
    }

    let matched: Vec<(usize, &FallbackRule)> = rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.triggers.iter().any(|t| trigger_matches(*t, &primary)))
        .collect();
    if matched.is_empty() {
        return primary;
    }

    let mut result = primary;
    for (index, rule) in matched {
        let action = rule.action.name();
        tracing::info!(target_id = %target.id, rule = index, action, "applying fallback rule");
        match execute_action(&rule.action, target, &run).await {
            Ok(mut outcome) => {
                outcome.fallback_used = Some(action.to_string());
                if outcome.skipped || !outcome.is_empty() {
                    tracing::info!(
                        target_id = %target.id,
                        action,
                        events = outcome.events.len(),
                        "fallback recovered target"
                    );
                    return Ok(outcome);
                }
                tracing::debug!(target_id = %target.id, action, "fallback produced no events");
                if result.is_err() {
                    result = Ok(outcome);
                }
            }
            Err(e) if is_final(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(target_id = %target.id, action, error = %e, "fallback failed");
            }
        }
    }
    result
}

async fn execute_action<F, Fut>(
    action: &FallbackAction,
    target: &ScrapeTarget,
    run: &F,
) -> Result<ScrapeOutcome, EngineError>
where
    F: Fn(ScrapeTarget) -> Fut,
    Fut: Future<Output = Result<ScrapeOutcome, EngineError>>,
{
    match action {
        FallbackAction::WaitAndRetry {
            delay_ms,
            max_retries,
        } => {
            let attempts = (*max_retries).max(1);
            let mut last = None;
            for attempt in 0..attempts {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                let result = run(target.clone()).await;
                match &result {
                    Ok(outcome) if !outcome.is_empty() => return result,
                    Err(e) if is_final(e) => return result,
                    _ => {}
                }
                tracing::debug!(
                    target_id = %target.id,
                    attempt,
                    "wait-and-retry attempt came back empty"
                );
                last = Some(result);
            }
            last.unwrap_or_else(|| Ok(ScrapeOutcome::default()))
        }
        FallbackAction::DifferentUrl { url } => run(target.with_base_url(url)).await,
        FallbackAction::AlternativeSelectors { container, item } => {
            run(target.with_selectors(container, item)).await
        }
        FallbackAction::Skip => {
            tracing::info!(target_id = %target.id, "skipping target by fallback rule");
            Ok(ScrapeOutcome::skipped(target))
        }
    }
}
