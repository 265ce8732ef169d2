//! HTML-to-plain-text cleanup for titles and descriptions.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>")
        .expect("valid regex")
});
static BLOCK_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/li|/h[1-6]|/tr)\b[^>]*>").expect("valid regex")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("valid regex")
});
static SPACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\n\s*").expect("valid regex"));

/// Strips tags and decodes entities, keeping paragraph breaks as single
/// newlines. Returns `None` when nothing readable is left.
#[must_use]
pub fn clean_text(input: &str) -> Option<String> {
    let without_scripts = SCRIPT_STYLE_RE.replace_all(input, " ");
    let with_breaks = BLOCK_BREAK_RE.replace_all(&without_scripts, "\n");
    let without_tags = TAG_RE.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&without_tags);
    let collapsed = SPACES_RE.replace_all(&decoded, " ");
    let lines = BLANK_LINES_RE.replace_all(collapsed.trim(), "\n");
    let cleaned = lines.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Single-line variant of [`clean_text`] for titles and names.
#[must_use]
pub fn clean_line(input: &str) -> Option<String> {
    clean_text(input).map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Decodes named and numeric character references. Unknown names are left
/// untouched.
#[must_use]
pub fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            decode_entity(body).map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

fn decode_entity(body: &str) -> Option<char> {
    if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = body.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    let c = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "euro" => '\u{20ac}',
        "pound" => '\u{a3}',
        "yen" => '\u{a5}',
        "cent" => '\u{a2}',
        "eacute" => '\u{e9}',
        "egrave" => '\u{e8}',
        "aacute" => '\u{e1}',
        "ntilde" => '\u{f1}',
        "ouml" => '\u{f6}',
        "uuml" => '\u{fc}',
        _ => return None,
    };
    Some(c)
}

/// Truncates on a char boundary.
#[must_use]
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
