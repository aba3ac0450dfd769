//! Field sanitizers - pure, total cell rewrites
//! Null in, Null out. Anything unparsable becomes Null rather than an error.

use crate::ingestion::types::ColumnValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:https?|ftp)://\S+|www\.\S+").expect("valid URL regex")
});

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%Y%m%d"];

/// Strip URLs, flatten control whitespace, collapse runs of spaces and double bare quotes
pub fn clean_text(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Null => ColumnValue::Null,
        ColumnValue::Text(s) => ColumnValue::Text(clean_text_str(s)),
        other => ColumnValue::Text(clean_text_str(&other.to_string())),
    }
}

fn clean_text_str(raw: &str) -> String {
    let without_urls = URL_PATTERN.replace_all(raw, "");
    let flattened = without_urls.replace(&['\n', '\r', '\t'][..], " ");
    let escaped = double_quotes(&flattened);
    WHITESPACE_RUN.replace_all(&escaped, " ").trim().to_string()
}

/// Double every quote that is not already part of a doubled pair, so cleaning twice is a no-op
fn double_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            out.push(c);
            continue;
        }
        out.push_str("\"\"");
        if chars.peek() == Some(&'"') {
            chars.next();
        }
    }
    out
}

/// "$1,200.50" -> 1200.5
pub fn clean_currency(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Null => ColumnValue::Null,
        ColumnValue::Currency(v) | ColumnValue::Number(v) => ColumnValue::Currency(*v),
        ColumnValue::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',')
                .collect();
            parse_finite(cleaned.trim())
                .map(ColumnValue::Currency)
                .unwrap_or(ColumnValue::Null)
        }
        _ => ColumnValue::Null,
    }
}

/// Plain floating point parse
pub fn coerce_numeric(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Null => ColumnValue::Null,
        ColumnValue::Currency(v) | ColumnValue::Number(v) => ColumnValue::Number(*v),
        ColumnValue::Text(s) => parse_finite(s.trim())
            .map(ColumnValue::Number)
            .unwrap_or(ColumnValue::Null),
        _ => ColumnValue::Null,
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// "t"/"f" (any case) become booleans; other values pass through lowercased
pub fn normalize_boolean(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Null => ColumnValue::Null,
        ColumnValue::Boolean(b) => ColumnValue::Boolean(*b),
        ColumnValue::Text(s) => {
            let lower = s.to_lowercase();
            match lower.as_str() {
                "t" | "true" => ColumnValue::Boolean(true),
                "f" | "false" => ColumnValue::Boolean(false),
                _ => ColumnValue::Text(lower),
            }
        }
        other => ColumnValue::Text(other.to_string().to_lowercase()),
    }
}

/// Best-effort date/time parse over the layouts seen in the extracts
pub fn parse_date(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Null => ColumnValue::Null,
        ColumnValue::Date(dt) => ColumnValue::Date(*dt),
        ColumnValue::Text(s) => parse_datetime_str(s.trim())
            .map(ColumnValue::Date)
            .unwrap_or(ColumnValue::Null),
        _ => ColumnValue::Null,
    }
}

fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
