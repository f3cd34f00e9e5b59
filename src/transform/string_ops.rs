use std::{borrow::Cow, sync::OnceLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

fn whitespace_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern"))
}

/// First whitespace-separated token.
pub fn split_name_first(value: &str) -> Cow<'_, str> {
    Cow::Borrowed(value.split_whitespace().next().unwrap_or(""))
}

/// Every token after the first, joined by single spaces.
pub fn split_name_last(value: &str) -> Cow<'_, str> {
    let rest = value.split_whitespace().skip(1).collect::<Vec<_>>();
    match rest.as_slice() {
        [] => Cow::Borrowed(""),
        [single] => Cow::Borrowed(*single),
        many => Cow::Owned(many.join(" ")),
    }
}

/// ISO calendar date when the value parses as a date, otherwise unchanged.
pub fn normalize_date(value: &str) -> Cow<'_, str> {
    let trimmed = value.trim();
    match parse_date(trimmed) {
        Some(date) => Cow::Owned(date.format("%Y-%m-%d").to_string()),
        None => Cow::Borrowed(value),
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Lowercase with whitespace runs collapsed to one underscore.
pub fn normalize_status(value: &str) -> Cow<'_, str> {
    let lowered = value.to_lowercase();
    Cow::Owned(whitespace_runs().replace_all(&lowered, "_").into_owned())
}

/// Digits only, keeping a leading plus sign.
pub fn normalize_phone(value: &str) -> Cow<'_, str> {
    let trimmed = value.trim_start();
    let mut output = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        output.push('+');
    }
    output.extend(trimmed.chars().filter(|ch| ch.is_ascii_digit()));
    Cow::Owned(output)
}

fn leading_number() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^-?(?:\d+\.?\d*|\.\d+)").expect("static number pattern")
    })
}

/// Keeps digits, dots, and minus signs, then parses the longest leading
/// number. Trailing leftovers such as the `-20` of a `10-20` range are ignored.
pub fn parse_number(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == '-')
        .collect();
    let prefix = leading_number().find(&cleaned)?;
    prefix
        .as_str()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

/// Lowercase representation, reusing the original string if already lowercase.
pub fn lowercase(input: &str) -> Cow<'_, str> {
    if input.chars().all(|ch| !ch.is_uppercase()) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(input.to_lowercase())
    }
}

/// Trims leading/trailing whitespace while borrowing the original.
pub fn trim(input: &str) -> Cow<'_, str> {
    Cow::Borrowed(input.trim())
}
