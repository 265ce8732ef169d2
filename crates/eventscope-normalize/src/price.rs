//! Ticket price text to a numeric range.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?").expect("valid regex")
});
static ISO_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(USD|EUR|GBP|CAD|AUD|NZD|JPY|CHF|SEK|NOK|DKK|MXN)\b").expect("valid regex")
});
static FREE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(free|no cover|gratis|complimentary)\b").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PriceInfo {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub currency: Option<String>,
    pub is_free: bool,
}

impl PriceInfo {
    fn free() -> Self {
        Self {
            min: Some(Decimal::ZERO),
            max: Some(Decimal::ZERO),
            currency: None,
            is_free: true,
        }
    }
}

/// Parses listing price text.
///
/// An explicit `is_free = Some(true)` wins over whatever the text says.
/// `"Free"` yields a zero range flagged free; `"$20 - $50"` yields 20..50 USD.
/// Text with amounts but no recognizable currency falls back to
/// `default_currency`. Text with neither amounts nor a free marker yields an
/// empty range.
#[must_use]
pub fn parse_price(text: Option<&str>, is_free: Option<bool>, default_currency: &str) -> PriceInfo {
    if is_free == Some(true) {
        return PriceInfo::free();
    }
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return PriceInfo::default();
    };

    let amounts: Vec<Decimal> = AMOUNT_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps[1].replace(',', "");
            let number = match caps.get(2) {
                Some(frac) => format!("{whole}.{}", frac.as_str()),
                None => whole,
            };
            Decimal::from_str(&number).ok()
        })
        .collect();
    let mentions_free = FREE_RE.is_match(text);

    if amounts.iter().all(Decimal::is_zero) {
        return if mentions_free || !amounts.is_empty() {
            PriceInfo::free()
        } else {
            PriceInfo::default()
        };
    }

    let positive = amounts.iter().copied().filter(|a| !a.is_zero());
    let mut min = positive.clone().min();
    let max = positive.max();
    // "Free - $20" style ranges start at zero.
    if mentions_free || amounts.iter().any(Decimal::is_zero) {
        min = Some(Decimal::ZERO);
    }

    PriceInfo {
        min,
        max,
        currency: Some(detect_currency(text).unwrap_or_else(|| default_currency.to_uppercase())),
        is_free: false,
    }
}

fn detect_currency(text: &str) -> Option<String> {
    if let Some(caps) = ISO_CODE_RE.captures(text) {
        return Some(caps[1].to_uppercase());
    }
    let code = if text.contains("CA$") || text.contains("C$") {
        "CAD"
    } else if text.contains("A$") {
        "AUD"
    } else if text.contains('$') {
        "USD"
    } else if text.contains('\u{20ac}') {
        "EUR"
    } else if text.contains('\u{a3}') {
        "GBP"
    } else if text.contains('\u{a5}') {
        "JPY"
    } else {
        return None;
    };
    Some(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn free_text_is_zero_range() {
        let info = parse_price(Some("Free"), None, "USD");
        assert_eq!(info.min, Some(Decimal::ZERO));
        assert_eq!(info.max, Some(Decimal::ZERO));
        assert!(info.is_free);
        assert_eq!(info.currency, None);
    }

    #[test]
    fn dollar_range() {
        let info = parse_price(Some("$20 - $50"), None, "EUR");
        assert_eq!(info.min, Some(dec("20")));
        assert_eq!(info.max, Some(dec("50")));
        assert_eq!(info.currency.as_deref(), Some("USD"));
        assert!(!info.is_free);
    }

    #[test]
    fn explicit_free_flag_short_circuits() {
        let info = parse_price(Some("$35"), Some(true), "USD");
        assert!(info.is_free);
        assert_eq!(info.max, Some(Decimal::ZERO));
    }

    #[test]
    fn single_amount_with_cents_and_thousands() {
        let info = parse_price(Some("Tickets from \u{a3}1,250.50"), None, "USD");
        assert_eq!(info.min, Some(dec("1250.50")));
        assert_eq!(info.max, Some(dec("1250.50")));
        assert_eq!(info.currency.as_deref(), Some("GBP"));
    }

    #[test]
    fn iso_code_beats_symbol() {
        let info = parse_price(Some("$15 CAD"), None, "USD");
        assert_eq!(info.currency.as_deref(), Some("CAD"));
    }

    #[test]
    fn bare_amount_uses_default_currency() {
        let info = parse_price(Some("25"), None, "eur");
        assert_eq!(info.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn free_with_paid_tier_starts_at_zero() {
        let info = parse_price(Some("Free - $20 VIP"), None, "USD");
        assert_eq!(info.min, Some(Decimal::ZERO));
        assert_eq!(info.max, Some(dec("20")));
        assert!(!info.is_free);
    }

    #[test]
    fn zero_amount_is_free() {
        assert!(parse_price(Some("$0.00"), None, "USD").is_free);
    }

    #[test]
    fn unpriced_text_is_empty() {
        assert_eq!(parse_price(Some("See website"), None, "USD"), PriceInfo::default());
        assert_eq!(parse_price(None, Some(false), "USD"), PriceInfo::default());
    }
}
