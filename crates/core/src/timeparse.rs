// core/timeparse.rs
// Timestamp parsing against a fixed, ordered set of layouts.
//
// The layout order is load-bearing: ambiguous strings must resolve to the
// same layout on every file, and the first layout that ever matches becomes
// the file's recorded layout.

use crate::error::CoreError;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Supported timestamp layouts, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLayout {
    /// `MM/dd/yyyy HH:mm:ss`
    MdyHms,
    /// `MM/dd/yyyy HH:mm:ss.SSS`
    MdyHmsMilli,
    /// `yyyy-MM-dd HH:mm:ss`
    YmdHms,
    /// `yyyy-MM-dd HH:mm:ss.SSS`
    YmdHmsMilli,
    Rfc3339,
    Rfc3339Nano,
}

pub const TIME_LAYOUTS: [TimeLayout; 6] = [
    TimeLayout::MdyHms,
    TimeLayout::MdyHmsMilli,
    TimeLayout::YmdHms,
    TimeLayout::YmdHmsMilli,
    TimeLayout::Rfc3339,
    TimeLayout::Rfc3339Nano,
];

impl TimeLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeLayout::MdyHms => "MM/dd/yyyy HH:mm:ss",
            TimeLayout::MdyHmsMilli => "MM/dd/yyyy HH:mm:ss.SSS",
            TimeLayout::YmdHms => "yyyy-MM-dd HH:mm:ss",
            TimeLayout::YmdHmsMilli => "yyyy-MM-dd HH:mm:ss.SSS",
            TimeLayout::Rfc3339 => "rfc3339",
            TimeLayout::Rfc3339Nano => "rfc3339nano",
        }
    }

    /// Source timestamps are naive wall clock; every layout anchors in UTC.
    fn parse(&self, s: &str) -> Option<DateTime<Utc>> {
        let naive = |fmt: &str| {
            NaiveDateTime::parse_from_str(s, fmt)
                .ok()
                .map(|dt| dt.and_utc())
        };
        match self {
            TimeLayout::MdyHms => naive("%m/%d/%Y %H:%M:%S"),
            TimeLayout::MdyHmsMilli => naive("%m/%d/%Y %H:%M:%S%.3f"),
            TimeLayout::YmdHms => naive("%Y-%m-%d %H:%M:%S"),
            TimeLayout::YmdHmsMilli => naive("%Y-%m-%d %H:%M:%S%.3f"),
            TimeLayout::Rfc3339 => {
                // The plain variant must not swallow fractional seconds, so
                // that sub-second inputs resolve to the nano layout.
                if s.contains('.') {
                    return None;
                }
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            TimeLayout::Rfc3339Nano => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Parse a timestamp value, returning the instant and the first layout that
/// accepted it.
pub fn parse_time_value(s: &str) -> Result<(DateTime<Utc>, TimeLayout), CoreError> {
    let s = s.trim();
    for layout in TIME_LAYOUTS {
        if let Some(ts) = layout.parse(s) {
            return Ok((ts, layout));
        }
    }
    Err(CoreError::UnrecognizedTime(s.to_string()))
}

/// Layout parsing with a Unix-millisecond fallback for pure-integer cells.
pub fn parse_time_or_millis(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok((ts, _)) = parse_time_value(s) {
        return Some(ts);
    }
    s.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_layout_order_is_deterministic() {
        let (ts, layout) = parse_time_value("01/02/2026 15:04:05").unwrap();
        assert_eq!(layout, TimeLayout::MdyHms);
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 1, 2, 15, 4, 5).unwrap());

        let (_, layout) = parse_time_value("01/02/2026 15:04:05.123").unwrap();
        assert_eq!(layout, TimeLayout::MdyHmsMilli);

        let (ts, layout) = parse_time_value("2026-02-09 15:30:00").unwrap();
        assert_eq!(layout, TimeLayout::YmdHms);
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 2, 9, 15, 30, 0).unwrap());
    }

    #[test]
    fn test_rfc3339_variants() {
        let (_, layout) = parse_time_value("2026-02-09T15:30:00Z").unwrap();
        assert_eq!(layout, TimeLayout::Rfc3339);

        let (ts, layout) = parse_time_value("2026-02-09T15:30:00.250Z").unwrap();
        assert_eq!(layout, TimeLayout::Rfc3339Nano);
        assert_eq!(ts.timestamp_subsec_millis(), 250);

        let (_, layout) = parse_time_value("2026-02-09T15:30:00+02:00").unwrap();
        assert_eq!(layout, TimeLayout::Rfc3339);
    }

    #[test]
    fn test_naive_layouts_are_tagged_utc() {
        let (ts, _) = parse_time_value("2026-02-09 15:30:04").unwrap();
        assert_eq!(ts.timestamp_millis(), 1770651004000);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_time_value("not a time").is_err());
        assert!(parse_time_value("").is_err());
        // Integers are not a layout; only the fallback path accepts them.
        assert!(parse_time_value("1770651004000").is_err());
    }

    #[test]
    fn test_millis_fallback() {
        let ts = parse_time_or_millis("1770651004000").unwrap();
        assert_eq!(ts.timestamp_millis(), 1770651004000);
        assert!(parse_time_or_millis("2026-02-09 15:30:04").is_some());
        assert!(parse_time_or_millis("12.5").is_none());
        assert!(parse_time_or_millis("").is_none());
    }
}
