//! Shared utility functions used across multiple modules.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Trimmed prefix of `value` for log and error messages, marked when cut.
pub fn excerpt(value: &str, max_chars: usize) -> String {
    let value = value.trim();
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a timestamp as sent by the API.
///
/// Accepts RFC 3339 strings and naive ISO-8601 strings (treated as UTC),
/// which is what the server emits for `created_at` / `scanned_at`.
pub fn parse_timestamp_millis(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// Format a unix-ms timestamp as `YYYY-MM-DD HH:MM:SS UTC`.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |value| value.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn parse_timestamp_accepts_naive_and_rfc3339() {
        assert_eq!(parse_timestamp_millis("1970-01-01T00:00:01"), Some(1_000));
        assert_eq!(
            parse_timestamp_millis("1970-01-01T00:00:01.500000"),
            Some(1_500)
        );
        assert_eq!(
            parse_timestamp_millis("1970-01-01T00:00:02+00:00"),
            Some(2_000)
        );
        assert_eq!(parse_timestamp_millis("yesterday"), None);
    }

    #[test]
    fn excerpt_marks_cut_text() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("0123456789abc", 10), "0123456789…");
    }

    #[test]
    fn format_timestamp_returns_utc_label() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }
}
