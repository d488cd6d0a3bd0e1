use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Parses a vendor or legacy date. Sentinel zero dates, blanks and anything
/// unparseable come back as `None`.
pub fn parse_vendor_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_zero_date(trimmed) {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.date());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    if (9..=11).contains(&trimmed.len()) && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let seconds = trimmed.parse::<i64>().ok()?;
        return DateTime::from_timestamp(seconds, 0).map(|dt| dt.date_naive());
    }
    None
}

/// Same as [`parse_vendor_date`] for JSON values (strings or unix timestamps).
pub fn parse_vendor_date_value(raw: &Value) -> Option<NaiveDate> {
    match raw {
        Value::String(value) => parse_vendor_date(value),
        Value::Number(number) => parse_vendor_date(&number.to_string()),
        _ => None,
    }
}

/// `0000-00-00`, `0000-00-00 00:00:00`, `00/00/0000` and similar.
pub fn is_zero_date(raw: &str) -> bool {
    let mut saw_digit = false;
    for c in raw.chars() {
        if c.is_ascii_digit() {
            if c != '0' {
                return false;
            }
            saw_digit = true;
        } else if !matches!(c, '-' | '/' | ':' | ' ' | 'T' | '.') {
            return false;
        }
    }
    saw_digit
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn zero_dates_are_absent() {
        assert_eq!(parse_vendor_date("0000-00-00"), None);
        assert_eq!(parse_vendor_date("0000-00-00 00:00:00"), None);
        assert_eq!(parse_vendor_date("00/00/0000"), None);
        assert_eq!(parse_vendor_date(""), None);
        assert!(!is_zero_date("2024-01-01"));
    }

    #[test]
    fn parses_common_vendor_formats() {
        assert_eq!(parse_vendor_date("2024-03-15"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_vendor_date("2024-03-15 10:20:30"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_vendor_date("2024-03-15T10:20:30"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_vendor_date("2024-03-15T10:20:30Z"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_vendor_date("03/15/2024"), Some(ymd(2024, 3, 15)));
        assert_eq!(parse_vendor_date("1710460800"), Some(ymd(2024, 3, 15)));
    }

    #[test]
    fn garbage_is_absent() {
        assert_eq!(parse_vendor_date("soon"), None);
        assert_eq!(parse_vendor_date("2024-13-45"), None);
        assert_eq!(parse_vendor_date_value(&json!(null)), None);
        assert_eq!(parse_vendor_date_value(&json!("2025-01-02")), Some(ymd(2025, 1, 2)));
    }
}
