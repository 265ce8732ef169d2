use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Default identity used when rotation is disabled.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but cannot be parsed.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but cannot be parsed.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Every variable has a default, so an empty environment yields a usable
/// configuration. Tests drive this with a `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        let raw = or_default(var, default);
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got '{other}'"))),
        }
    };

    let env = parse_environment(&or_default("EVENTSCOPE_ENV", "development"))?;
    let log_level = or_default("EVENTSCOPE_LOG_LEVEL", "info");

    let requests_per_minute = parse_u32("EVENTSCOPE_REQUESTS_PER_MINUTE", "30")?;
    if requests_per_minute == 0 {
        return Err(invalid(
            "EVENTSCOPE_REQUESTS_PER_MINUTE",
            "must be at least 1".to_string(),
        ));
    }
    let burst_size = parse_u32("EVENTSCOPE_BURST_SIZE", "3")?;
    let inter_request_delay_ms = parse_u64("EVENTSCOPE_INTER_REQUEST_DELAY_MS", "1000")?;

    let navigation_timeout_ms = parse_u64("EVENTSCOPE_NAVIGATION_TIMEOUT_MS", "30000")?;
    let action_timeout_ms = parse_u64("EVENTSCOPE_ACTION_TIMEOUT_MS", "10000")?;
    let wait_timeout_ms = parse_u64("EVENTSCOPE_WAIT_TIMEOUT_MS", "15000")?;

    let max_retries = parse_u32("EVENTSCOPE_MAX_RETRIES", "3")?;
    let retry_base_delay_ms = parse_u64("EVENTSCOPE_RETRY_BASE_DELAY_MS", "1000")?;
    let retry_max_delay_ms = parse_u64("EVENTSCOPE_RETRY_MAX_DELAY_MS", "30000")?;
    let multiplier_var = "EVENTSCOPE_RETRY_BACKOFF_MULTIPLIER";
    let retry_backoff_multiplier = or_default(multiplier_var, "2.0")
        .parse::<f64>()
        .map_err(|e| invalid(multiplier_var, e.to_string()))?;
    if !retry_backoff_multiplier.is_finite() || retry_backoff_multiplier < 1.0 {
        return Err(invalid(
            multiplier_var,
            format!("must be a finite number >= 1.0, got {retry_backoff_multiplier}"),
        ));
    }

    let stealth = parse_bool("EVENTSCOPE_STEALTH", "true")?;
    let rotate_identity = parse_bool("EVENTSCOPE_ROTATE_IDENTITY", "true")?;
    let user_agent = or_default("EVENTSCOPE_USER_AGENT", DEFAULT_USER_AGENT);

    let max_sessions = parse_usize("EVENTSCOPE_MAX_SESSIONS", "5")?;
    let concurrency = parse_usize("EVENTSCOPE_CONCURRENCY", "3")?;
    let chunk_pause_ms = parse_u64("EVENTSCOPE_CHUNK_PAUSE_MS", "2000")?;
    let max_pages = parse_u32("EVENTSCOPE_MAX_PAGES", "10")?;
    let default_timezone = or_default("EVENTSCOPE_DEFAULT_TIMEZONE", "UTC");

    Ok(AppConfig {
        env,
        log_level,
        requests_per_minute,
        burst_size,
        inter_request_delay_ms,
        navigation_timeout_ms,
        action_timeout_ms,
        wait_timeout_ms,
        max_retries,
        retry_base_delay_ms,
        retry_max_delay_ms,
        retry_backoff_multiplier,
        stealth,
        rotate_identity,
        user_agent,
        max_sessions,
        concurrency,
        chunk_pause_ms,
        max_pages,
        default_timezone,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for values other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "EVENTSCOPE_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
