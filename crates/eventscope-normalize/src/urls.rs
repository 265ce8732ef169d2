//! URL validation and protocol normalization.

use url::Url;

/// Image extensions accepted when no allowlist is configured.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif"];

/// Validates and normalizes a link.
///
/// Protocol-relative (`//host/x`) and bare `www.` links become `https`.
/// Relative links are joined onto `base` when one is given. Anything that is
/// not `http(s)` after that (`javascript:`, `mailto:`, fragments) is rejected.
#[must_use]
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let candidate = if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else if trimmed.to_ascii_lowercase().starts_with("www.") {
        format!("https://{trimmed}")
    } else {
        trimmed.to_string()
    };

    let parsed = match Url::parse(&candidate) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(&candidate).ok()?,
        Err(_) => return None,
    };

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed.to_string())
}

/// True when the URL path ends in one of `allowed` (case-insensitive).
#[must_use]
pub fn has_allowed_extension(url: &str, allowed: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(last) = parsed.path_segments().and_then(|mut segments| segments.next_back()) else {
        return false;
    };
    let Some((_, ext)) = last.rsplit_once('.') else {
        return false;
    };
    allowed.iter().any(|a| a.eq_ignore_ascii_case(ext))
}
