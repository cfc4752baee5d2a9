//! Attendance wall clock.
//!
//! Attendance is recorded as naive local time in one fixed time zone
//! (IST, UTC+05:30, unless configured otherwise). "Today" and day
//! boundaries are always computed in that same zone.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use serde::Serializer;
use thiserror::Error;

/// Default offset: India Standard Time.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
];

#[derive(Error, Debug, PartialEq)]
pub enum ClockError {
    #[error("UTC offset out of range: {0} minutes")]
    InvalidOffset(i32),
    #[error("unrecognized timestamp: {0:?}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, Copy)]
pub struct AttendanceClock {
    offset: FixedOffset,
}

impl AttendanceClock {
    pub fn new(utc_offset_minutes: i32) -> Result<Self, ClockError> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ClockError::InvalidOffset(utc_offset_minutes))?;
        Ok(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current wall-clock time in the attendance zone.
    pub fn now(&self) -> NaiveDateTime {
        self.localize(Utc::now())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Convert an instant into attendance-zone wall-clock time.
    pub fn localize(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    /// Half-open `[start, end)` covering `date`.
    pub fn day_bounds(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let start = date.and_time(NaiveTime::MIN);
        let end = date
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(NaiveTime::MIN))
            .unwrap_or(NaiveDateTime::MAX);
        (start, end)
    }

    /// Parse a client-supplied timestamp.
    ///
    /// Accepts ISO date-times with `T` or space, optional minutes, seconds
    /// and fractions, and a bare date (midnight) in extended or basic
    /// (`YYYYMMDD`) form. A trailing UTC offset (`Z`, `+05:30`, `+0530`)
    /// is converted into the attendance zone.
    pub fn parse_timestamp(&self, text: &str) -> Result<NaiveDateTime, ClockError> {
        let text = text.trim();

        if let Ok(with_offset) = DateTime::parse_from_rfc3339(text) {
            return Ok(self.localize(with_offset.with_timezone(&Utc)));
        }
        for format in OFFSET_FORMATS {
            if let Ok(with_offset) = DateTime::parse_from_str(text, format) {
                return Ok(self.localize(with_offset.with_timezone(&Utc)));
            }
        }

        for format in NAIVE_FORMATS {
            if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(ts);
            }
        }

        parse_date_hour(text)
            .or_else(|| basic_date(text))
            .ok_or_else(|| ClockError::InvalidTimestamp(text.to_string()))
    }
}

impl Default for AttendanceClock {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).unwrap_or(Utc.fix()),
        }
    }
}

/// `YYYY-MM-DD`, optionally followed by `T` or a space and a two-digit hour.
fn parse_date_hour(text: &str) -> Option<NaiveDateTime> {
    let (date, rest) = NaiveDate::parse_and_remainder(text, "%Y-%m-%d").ok()?;
    if rest.is_empty() {
        return Some(date.and_time(NaiveTime::MIN));
    }
    let hour = rest.strip_prefix(['T', ' '])?;
    if hour.len() != 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    date.and_hms_opt(hour.parse().ok()?, 0, 0)
}

/// Basic-format date, `YYYYMMDD`.
fn basic_date(text: &str) -> Option<NaiveDateTime> {
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(
        text[..4].parse().ok()?,
        text[4..6].parse().ok()?,
        text[6..].parse().ok()?,
    )
    .map(|d| d.and_time(NaiveTime::MIN))
}

/// ISO-8601 without offset; fractional seconds only when non-zero.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

pub fn serialize_timestamp<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_default_is_ist() {
        let clock = AttendanceClock::default();
        assert_eq!(clock.offset().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn test_invalid_offset() {
        assert_eq!(
            AttendanceClock::new(24 * 60).unwrap_err(),
            ClockError::InvalidOffset(24 * 60)
        );
    }

    #[test]
    fn test_localize_crosses_midnight() {
        let clock = AttendanceClock::default();
        let utc = Utc.with_ymd_and_hms(2024, 3, 31, 20, 0, 0).unwrap();
        assert_eq!(clock.localize(utc), ts(2024, 4, 1, 1, 30, 0));
    }

    #[test]
    fn test_day_bounds_half_open() {
        let clock = AttendanceClock::default();
        let (start, end) = clock.day_bounds(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(start, ts(2024, 2, 29, 0, 0, 0));
        assert_eq!(end, ts(2024, 3, 1, 0, 0, 0));
    }

    #[test]
    fn test_parse_iso_variants() {
        let clock = AttendanceClock::default();
        assert_eq!(
            clock.parse_timestamp("2024-01-05T09:30:00").unwrap(),
            ts(2024, 1, 5, 9, 30, 0)
        );
        assert_eq!(
            clock.parse_timestamp("2024-01-05 09:30:15").unwrap(),
            ts(2024, 1, 5, 9, 30, 15)
        );
        assert_eq!(
            clock.parse_timestamp("2024-01-05T09:30").unwrap(),
            ts(2024, 1, 5, 9, 30, 0)
        );
        assert_eq!(
            clock.parse_timestamp("2024-01-05").unwrap(),
            ts(2024, 1, 5, 0, 0, 0)
        );
        let fractional = clock.parse_timestamp("2024-01-05T09:30:00.250").unwrap();
        assert_eq!(fractional.and_utc().timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_with_offset_converts_to_attendance_zone() {
        let clock = AttendanceClock::default();
        assert_eq!(
            clock.parse_timestamp("2024-01-05T04:00:00Z").unwrap(),
            ts(2024, 1, 5, 9, 30, 0)
        );
    }

    #[test]
    fn test_parse_offset_without_seconds_or_colon() {
        let clock = AttendanceClock::default();
        assert_eq!(
            clock.parse_timestamp("2024-01-05T09:30+05:30").unwrap(),
            ts(2024, 1, 5, 9, 30, 0)
        );
        assert_eq!(
            clock.parse_timestamp("2024-01-05T09:30:00+0530").unwrap(),
            ts(2024, 1, 5, 9, 30, 0)
        );
        assert_eq!(
            clock.parse_timestamp("2024-01-05 04:00+00:00").unwrap(),
            ts(2024, 1, 5, 9, 30, 0)
        );
    }

    #[test]
    fn test_parse_hour_only_and_basic_date() {
        let clock = AttendanceClock::default();
        assert_eq!(
            clock.parse_timestamp("2024-01-05T09").unwrap(),
            ts(2024, 1, 5, 9, 0, 0)
        );
        assert_eq!(
            clock.parse_timestamp("20240105").unwrap(),
            ts(2024, 1, 5, 0, 0, 0)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let clock = AttendanceClock::default();
        assert!(clock.parse_timestamp("yesterday").is_err());
        assert!(clock.parse_timestamp("2024-13-01T00:00:00").is_err());
        assert!(clock.parse_timestamp("2024-01-05T25").is_err());
        assert!(clock.parse_timestamp("2024-01-05T9").is_err());
        assert!(clock.parse_timestamp("20241301").is_err());
    }

    #[test]
    fn test_format_omits_zero_fraction() {
        assert_eq!(format_timestamp(&ts(2024, 1, 5, 9, 30, 0)), "2024-01-05T09:30:00");
        let with_micros = ts(2024, 1, 5, 9, 30, 0)
            .checked_add_signed(chrono::Duration::microseconds(1500))
            .unwrap();
        assert_eq!(format_timestamp(&with_micros), "2024-01-05T09:30:00.001500");
    }
}
