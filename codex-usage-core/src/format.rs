//! Timestamp parsing and formatting helpers shared by the parsers and the store.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse a rollout timestamp.
///
/// Accepts RFC 3339 (with `Z` or an explicit offset) and naive ISO-8601
/// datetimes, which are taken to be UTC. Returns `None` for anything else.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Format a UTC instant the way the store persists it.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Human-readable reset time relative to the capture day.
///
/// Yields `"HH:MM"` when the reset falls on the same local calendar day as
/// `captured`, otherwise `"HH:MM on D Mon"`.
pub fn format_reset(resets_at: i64, captured: DateTime<Utc>, tz: Tz) -> Option<String> {
    let reset = Utc.timestamp_opt(resets_at, 0).single()?.with_timezone(&tz);
    let captured_local = captured.with_timezone(&tz);
    let time_text = reset.format("%H:%M").to_string();
    if reset.date_naive() == captured_local.date_naive() {
        Some(time_text)
    } else {
        Some(format!("{} on {}", time_text, reset.format("%-d %b")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_variants() {
        let z = parse_timestamp("2025-01-01T10:00:00.000Z").unwrap();
        let offset = parse_timestamp("2025-01-01T11:00:00+01:00").unwrap();
        let naive = parse_timestamp("2025-01-01T10:00:00").unwrap();
        assert_eq!(z, offset);
        assert_eq!(z, naive);
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_format_utc_is_fixed_width() {
        let ts = parse_timestamp("2025-01-01T10:00:00Z").unwrap();
        assert_eq!(format_utc(ts), "2025-01-01T10:00:00.000000Z");
    }

    #[test]
    fn test_format_reset_same_day() {
        let tz = chrono_tz::Europe::Stockholm;
        let captured = parse_timestamp("2025-01-01T10:00:02Z").unwrap();
        // 2025-01-01T10:00:00Z is 11:00 in Stockholm
        assert_eq!(
            format_reset(1_735_725_600, captured, tz).as_deref(),
            Some("11:00")
        );
    }

    #[test]
    fn test_format_reset_other_day() {
        let tz = chrono_tz::Europe::Stockholm;
        let captured = parse_timestamp("2025-01-01T10:00:02Z").unwrap();
        // 2025-01-02T10:00:00Z
        assert_eq!(
            format_reset(1_735_812_000, captured, tz).as_deref(),
            Some("11:00 on 2 Jan")
        );
    }
}
