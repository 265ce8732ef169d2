//! Date and time parsing for the free-form strings listing pages print.
//!
//! Everything resolves to UTC through an explicit [`Tz`]. Dates printed
//! without a year borrow one from a caller-supplied reference so the result
//! never depends on the wall clock.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%A, %B %d, %Y",
    "%a, %b %d, %Y",
    "%A %B %d %Y",
    "%a %b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%A, %d %B %Y",
    "%a, %d %b %Y",
];

/// Formats that omit the year; tried with the reference year appended.
const YEARLESS_FORMATS: &[&str] = &[
    "%B %d",
    "%b %d",
    "%A, %B %d",
    "%a, %b %d",
    "%A %B %d",
    "%a %b %d",
    "%d %B",
    "%d %b",
    "%m/%d",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("valid regex"));
static TWELVE_HOUR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:[:.](\d{2}))?\s*([ap])\.?\s?m\.?(?:\b|$)").expect("valid regex")
});
static TWENTY_FOUR_HOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})(?::(\d{2}))?\b").expect("valid regex"));

/// Parses a calendar date. `reference_year` fills in dates like `"Sat, Oct 20"`.
#[must_use]
pub fn parse_date(raw: &str, reference_year: i32) -> Option<NaiveDate> {
    let cleaned = tidy(raw);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(dt) = parse_offset_datetime(&cleaned) {
        return Some(dt.date_naive());
    }
    if let Some(naive) = parse_naive_datetime(&cleaned) {
        return Some(naive.date());
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return Some(date);
        }
    }

    let with_year = format!("{cleaned} {reference_year}");
    for format in YEARLESS_FORMATS {
        let format_with_year = format!("{format} %Y");
        if let Ok(date) = NaiveDate::parse_from_str(&with_year, &format_with_year) {
            return Some(date);
        }
    }

    None
}

/// Parses a wall-clock time such as `"8pm"`, `"7:30 PM"`, `"Doors 19:00"`,
/// or `"noon"`.
#[must_use]
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if lower.contains("noon") {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }
    if lower.contains("midnight") {
        return NaiveTime::from_hms_opt(0, 0, 0);
    }

    if let Some(caps) = TWELVE_HOUR_RE.captures(&lower) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let hour24 = match (&caps[3], hour) {
            ("a", 12) => 0,
            ("a", h) => h,
            ("p", 12) => 12,
            (_, h) => h + 12,
        };
        return NaiveTime::from_hms_opt(hour24, minute, 0);
    }

    if let Some(caps) = TWENTY_FOUR_HOUR_RE.captures(&lower) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        let second: u32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
        return NaiveTime::from_hms_opt(hour, minute, second);
    }

    None
}

/// Combines a date string and optional time string into a UTC instant.
///
/// A date carrying its own offset (RFC 3339) is used as-is. Otherwise the
/// local wall-clock time is interpreted in `tz`; a time that falls into a
/// DST gap is moved forward by an hour. A missing or unparseable time means
/// local midnight.
#[must_use]
pub fn parse_datetime(
    date: &str,
    time: Option<&str>,
    tz: Tz,
    reference_year: i32,
) -> Option<DateTime<Utc>> {
    let cleaned = tidy(date);
    if let Some(dt) = parse_offset_datetime(&cleaned) {
        return Some(dt);
    }

    let naive = match parse_naive_datetime(&cleaned) {
        Some(naive) => match time.and_then(parse_time) {
            Some(t) => naive.date().and_time(t),
            None => naive,
        },
        None => {
            let day = parse_date(&cleaned, reference_year)?;
            let clock = time
                .and_then(parse_time)
                .or_else(|| embedded_time(date))
                .unwrap_or_default();
            day.and_time(clock)
        }
    };

    localize(naive, tz)
}

/// Resolves an optional end instant. An end with only a time that lands
/// before the start is taken to cross midnight.
#[must_use]
pub fn parse_end_datetime(
    start: DateTime<Utc>,
    start_date: &str,
    end_date: Option<&str>,
    end_time: Option<&str>,
    tz: Tz,
    reference_year: i32,
) -> Option<DateTime<Utc>> {
    match (end_date, end_time) {
        (None, None) => None,
        (Some(date), time) => {
            let end = parse_datetime(date, time, tz, reference_year)?;
            (end >= start).then_some(end)
        }
        (None, Some(time)) => {
            let clock = parse_time(time)?;
            let day = parse_date(start_date, reference_year)
                .unwrap_or_else(|| start.with_timezone(&tz).date_naive());
            let mut end = localize(day.and_time(clock), tz)?;
            if end < start {
                end += Duration::days(1);
            }
            Some(end)
        }
    }
}

/// Parses an IANA timezone name.
#[must_use]
pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_offset_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

/// Some sources print the start time inside the date string, e.g.
/// `"Oct 20, 2025 @ 8pm"`.
fn embedded_time(s: &str) -> Option<NaiveTime> {
    if TWELVE_HOUR_RE.is_match(&s.to_lowercase()) {
        parse_time(s)
    } else {
        None
    }
}

/// Normalizes separators and ordinal suffixes, and drops trailing time
/// fragments that would otherwise defeat the date formats.
fn tidy(raw: &str) -> String {
    let no_ordinals = ORDINAL_RE.replace_all(raw.trim(), "$1");
    let head = no_ordinals
        .split(['@', '|', '\u{2022}'])
        .next()
        .unwrap_or_default();
    let head = TWELVE_HOUR_RE.replace_all(head, "");
    head.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches([',', '-'])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_iso_and_us_dates() {
        assert_eq!(parse_date("2025-10-20", 2000), Some(ymd(2025, 10, 20)));
        assert_eq!(parse_date("10/20/2025", 2000), Some(ymd(2025, 10, 20)));
        assert_eq!(parse_date("October 20, 2025", 2000), Some(ymd(2025, 10, 20)));
        assert_eq!(parse_date("Mon, Oct 20, 2025", 2000), Some(ymd(2025, 10, 20)));
    }

    #[test]
    fn strips_ordinal_suffixes() {
        assert_eq!(parse_date("October 20th, 2025", 2000), Some(ymd(2025, 10, 20)));
        assert_eq!(parse_date("1st November 2025", 2000), Some(ymd(2025, 11, 1)));
    }

    #[test]
    fn yearless_dates_use_reference_year() {
        assert_eq!(parse_date("Oct 20", 2025), Some(ymd(2025, 10, 20)));
        assert_eq!(parse_date("Mon, Oct 20", 2025), Some(ymd(2025, 10, 20)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_date("TBA", 2025), None);
        assert_eq!(parse_date("", 2025), None);
        assert_eq!(parse_time("doors open"), None);
    }

    #[test]
    fn parses_twelve_hour_times() {
        assert_eq!(parse_time("8pm"), NaiveTime::from_hms_opt(20, 0, 0));
        assert_eq!(parse_time("7:30 PM"), NaiveTime::from_hms_opt(19, 30, 0));
        assert_eq!(parse_time("12:15 a.m."), NaiveTime::from_hms_opt(0, 15, 0));
        assert_eq!(parse_time("12 pm"), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(parse_time("Doors 9 PM / Show 10 PM"), NaiveTime::from_hms_opt(21, 0, 0));
    }

    #[test]
    fn parses_twenty_four_hour_times_and_words() {
        assert_eq!(parse_time("19:00"), NaiveTime::from_hms_opt(19, 0, 0));
        assert_eq!(parse_time("Noon"), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(parse_time("25:00"), None);
    }

    #[test]
    fn localizes_to_utc() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let dt = parse_datetime("2025-10-20", Some("8:00 PM"), tz, 2025).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-21T00:00:00+00:00");
    }

    #[test]
    fn offset_timestamps_ignore_declared_zone() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let dt = parse_datetime("2025-10-20T20:00:00-05:00", None, tz, 2025).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-21T01:00:00+00:00");
    }

    #[test]
    fn missing_time_means_local_midnight() {
        let tz: Tz = "Europe/London".parse().unwrap();
        let dt = parse_datetime("2025-01-15", None, tz, 2025).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-01-15T00:00:00+00:00");
    }

    #[test]
    fn time_embedded_in_date_string() {
        let dt = parse_datetime("Oct 20, 2025 @ 8pm", None, Tz::UTC, 2025).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-20T20:00:00+00:00");
    }

    #[test]
    fn dst_gap_moves_forward() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 2:30 AM does not exist on 2025-03-09 in New York.
        let dt = parse_datetime("2025-03-09", Some("2:30 AM"), tz, 2025).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-03-09T07:30:00+00:00");
    }

    #[test]
    fn end_time_crossing_midnight_rolls_forward() {
        let start = parse_datetime("2025-10-20", Some("10pm"), Tz::UTC, 2025).unwrap();
        let end =
            parse_end_datetime(start, "2025-10-20", None, Some("2am"), Tz::UTC, 2025).unwrap();
        assert_eq!(end.to_rfc3339(), "2025-10-21T02:00:00+00:00");
    }

    #[test]
    fn end_before_start_with_explicit_date_is_dropped() {
        let start = parse_datetime("2025-10-20", Some("10pm"), Tz::UTC, 2025).unwrap();
        assert_eq!(
            parse_end_datetime(start, "2025-10-20", Some("2025-10-19"), None, Tz::UTC, 2025),
            None
        );
    }

    #[test]
    fn timezone_names() {
        assert!(parse_timezone("Europe/Berlin").is_some());
        assert!(parse_timezone("Mars/Olympus").is_none());
    }
}
