//! Header and field normalization applied before any name-based matching.
//!
//! The same [`normalize_key`] runs over mapping entry source names and over
//! live CSV header names; a mapping only resolves when both sides agree.

use std::borrow::Cow;

const BYTE_ORDER_MARK: char = '\u{feff}';

fn is_invisible(ch: char) -> bool {
    matches!(
        ch,
        '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}' | '\u{00a0}'
    )
}

fn strip_quote_layer(value: &str) -> &str {
    let value = value
        .strip_prefix(['"', '\''])
        .unwrap_or(value);
    value.strip_suffix(['"', '\'']).unwrap_or(value)
}

/// Normalizes a column name: leading marker, invisible characters, one layer
/// of surrounding quotes, surrounding whitespace.
pub fn normalize_key(raw: &str) -> Cow<'_, str> {
    let without_marker = raw.strip_prefix(BYTE_ORDER_MARK).unwrap_or(raw);
    let visible: Cow<'_, str> = if without_marker.chars().any(is_invisible) {
        Cow::Owned(without_marker.chars().filter(|ch| !is_invisible(*ch)).collect())
    } else {
        Cow::Borrowed(without_marker)
    };
    let unquoted = strip_quote_layer(visible.trim()).trim();
    if unquoted.len() == raw.len() {
        return Cow::Borrowed(raw);
    }
    Cow::Owned(unquoted.to_string())
}

/// Normalizes a cell value. Quotes are left alone (the CSV reader already
/// unwrapped them) and non-breaking spaces become ordinary spaces.
pub fn normalize_value(raw: &str) -> Cow<'_, str> {
    if !raw.chars().any(is_invisible) {
        let trimmed = raw.trim();
        return if trimmed.len() == raw.len() {
            Cow::Borrowed(raw)
        } else {
            Cow::Owned(trimmed.to_string())
        };
    }
    let cleaned: String = raw
        .chars()
        .filter_map(|ch| match ch {
            '\u{00a0}' => Some(' '),
            ch if is_invisible(ch) => None,
            ch => Some(ch),
        })
        .collect();
    Cow::Owned(cleaned.trim().to_string())
}

pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|header| normalize_key(header).into_owned())
        .collect()
}
