mod repository;
mod schema;

use chrono::{DateTime, SecondsFormat, Utc};

pub use repository::{CleanupReport, Repository};

/// Timestamps are stored as `YYYY-MM-DDTHH:MM:SSZ` so string order in SQL
/// matches time order.
pub fn db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip_and_ordering() {
        let early = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();

        assert_eq!(db_timestamp(early), "2026-01-09T23:59:59Z");
        assert!(db_timestamp(early) < db_timestamp(late));
        assert_eq!(parse_datetime(&db_timestamp(late)), Some(late));
    }

    #[test]
    fn test_parse_sqlite_format() {
        let parsed = parse_datetime("2026-01-11 12:34:56").unwrap();
        assert_eq!(db_timestamp(parsed), "2026-01-11T12:34:56Z");
        assert!(parse_datetime("yesterday").is_none());
    }
}
