//! Monthly attendance aggregation: per-user reports, analytics and the
//! per-user calendar. Everything here is pure over already-loaded rows.

use crate::clock::format_timestamp;
use crate::types::{AttendanceRecord, UserProfile};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Months covered by the "average attendance" trend, newest first.
pub const TREND_MONTHS: usize = 6;

pub const DEFAULT_WORKING_DAYS: u32 = 22;
pub const DEFAULT_DEFAULTER_THRESHOLD_PCT: f64 = 75.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    #[error("invalid month {month} of year {year}")]
    InvalidMonth { year: i32, month: u32 },
}

/// A calendar month; `[start, end)` spans it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Month {
    first: NaiveDate,
    next: NaiveDate,
}

impl Month {
    /// Years outside `1..=9999` are rejected along with impossible months.
    pub fn new(year: i32, month: u32) -> Result<Self, ReportError> {
        let invalid = ReportError::InvalidMonth { year, month };
        if !(1..=9999).contains(&year) {
            return Err(invalid);
        }
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(invalid.clone())?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or(invalid)?;
        Ok(Self { first, next })
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn start(&self) -> NaiveDateTime {
        self.first.and_time(NaiveTime::MIN)
    }

    /// First instant of the following month.
    pub fn end(&self) -> NaiveDateTime {
        self.next.and_time(NaiveTime::MIN)
    }

    pub fn days(&self) -> u32 {
        (self.next - self.first).num_days() as u32
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        *ts >= self.start() && *ts < self.end()
    }

    pub fn previous(&self) -> Option<Self> {
        let (year, month) = match self.month() {
            1 => (self.year() - 1, 12),
            m => (self.year(), m - 1),
        };
        Self::new(year, month).ok()
    }

    /// This month and up to `count - 1` before it, newest first.
    pub fn trailing(&self, count: usize) -> Vec<Self> {
        std::iter::successors(Some(*self), Month::previous)
            .take(count)
            .collect()
    }
}

/// Thresholds used by [`monthly_analytics`].
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsPolicy {
    /// Days a user must attend in a month to count as full attendance.
    pub working_days: u32,
    /// Percentage below which a user is listed as a defaulter.
    pub defaulter_threshold_pct: f64,
}

impl Default for AnalyticsPolicy {
    fn default() -> Self {
        Self {
            working_days: DEFAULT_WORKING_DAYS,
            defaulter_threshold_pct: DEFAULT_DEFAULTER_THRESHOLD_PCT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReportRow {
    pub user_id: i64,
    pub user_name: String,
    pub email: String,
    pub mobile_number: String,
    pub gender: String,
    pub total_working_days: u32,
    pub total_days_present: u32,
    pub monthly_attendance_percentage: f64,
    pub daily_log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthAverage {
    pub month: u32,
    pub year: i32,
    pub average_attendance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Defaulter {
    pub name: String,
    pub attendance_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAnalytics {
    pub average_attendance_last_6_months: Vec<MonthAverage>,
    pub full_attendance_users: Vec<String>,
    pub defaulters_list: Vec<Defaulter>,
}

/// Distinct attendance days per user within `month`.
fn present_days(month: &Month, records: &[AttendanceRecord]) -> HashMap<i64, BTreeSet<NaiveDate>> {
    let mut days: HashMap<i64, BTreeSet<NaiveDate>> = HashMap::new();
    for record in records.iter().filter(|r| month.contains(&r.timestamp)) {
        days.entry(record.user_id)
            .or_default()
            .insert(record.timestamp.date());
    }
    days
}

fn percentage(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// One row per user: calendar days in the month, distinct days present,
/// their ratio, and every timestamp logged in the month.
pub fn monthly_report(
    month: &Month,
    users: &[UserProfile],
    records: &[AttendanceRecord],
) -> Vec<MonthlyReportRow> {
    let working_days = month.days();
    let days = present_days(month, records);

    users
        .iter()
        .map(|user| {
            let mut log: Vec<&NaiveDateTime> = records
                .iter()
                .filter(|r| r.user_id == user.id && month.contains(&r.timestamp))
                .map(|r| &r.timestamp)
                .collect();
            log.sort();

            let present = days.get(&user.id).map_or(0, |d| d.len() as u32);
            MonthlyReportRow {
                user_id: user.id,
                user_name: user.name.clone(),
                email: user.email.clone(),
                mobile_number: user.mobile_number.clone(),
                gender: user.gender.clone(),
                total_working_days: working_days,
                total_days_present: present,
                monthly_attendance_percentage: percentage(present, working_days),
                daily_log: log.into_iter().map(format_timestamp).collect(),
            }
        })
        .collect()
}

/// Six-month attendance trend plus full-attendance and defaulter lists
/// for `month`. `records` must cover at least the trend window.
pub fn monthly_analytics(
    month: &Month,
    users: &[UserProfile],
    records: &[AttendanceRecord],
    policy: &AnalyticsPolicy,
) -> MonthlyAnalytics {
    let total_users = users.len() as u32;

    let average_attendance_last_6_months = month
        .trailing(TREND_MONTHS)
        .into_iter()
        .map(|m| {
            let present: HashSet<i64> = records
                .iter()
                .filter(|r| m.contains(&r.timestamp))
                .map(|r| r.user_id)
                .collect();
            MonthAverage {
                month: m.month(),
                year: m.year(),
                average_attendance: percentage(present.len() as u32, total_users),
            }
        })
        .collect();

    let working_days = policy.working_days.max(1);
    let days = present_days(month, records);
    let present_of = |user: &UserProfile| days.get(&user.id).map_or(0, |d| d.len() as u32);

    let full_attendance_users = users
        .iter()
        .filter(|u| present_of(*u) >= working_days)
        .map(|u| u.name.clone())
        .collect();

    let defaulters_list = users
        .iter()
        .filter_map(|u| {
            let pct = percentage(present_of(u), working_days).min(100.0);
            (pct < policy.defaulter_threshold_pct).then(|| Defaulter {
                name: u.name.clone(),
                attendance_percentage: pct,
            })
        })
        .collect();

    MonthlyAnalytics {
        average_attendance_last_6_months,
        full_attendance_users,
        defaulters_list,
    }
}

/// Day of month → "Present" for every day with at least one record.
pub fn monthly_calendar(month: &Month, records: &[AttendanceRecord]) -> BTreeMap<u32, &'static str> {
    records
        .iter()
        .filter(|r| month.contains(&r.timestamp))
        .map(|r| (r.timestamp.day(), "Present"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, name: &str) -> UserProfile {
        UserProfile {
            id,
            name: name.to_string(),
            email: format!("{name}@example.com"),
            mobile_number: "5550100".to_string(),
            gender: "F".to_string(),
        }
    }

    fn at(id: i64, user_id: i64, y: i32, m: u32, d: u32, h: u32) -> AttendanceRecord {
        AttendanceRecord {
            id,
            user_id,
            timestamp: NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_month_bounds() {
        let feb = Month::new(2024, 2).unwrap();
        assert_eq!(feb.days(), 29);
        assert_eq!(feb.end(), Month::new(2024, 3).unwrap().start());
        let dec = Month::new(2023, 12).unwrap();
        assert_eq!(dec.days(), 31);
        assert_eq!(dec.end().date(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_month_rejects_out_of_range() {
        assert_eq!(
            Month::new(2024, 13).unwrap_err(),
            ReportError::InvalidMonth { year: 2024, month: 13 }
        );
        assert!(Month::new(2024, 0).is_err());
    }

    #[test]
    fn test_month_year_range() {
        assert!(Month::new(0, 5).is_err());
        assert!(Month::new(-5, 5).is_err());
        assert!(Month::new(10000, 1).is_err());
        assert!(Month::new(1, 1).is_ok());
        let last = Month::new(9999, 12).unwrap();
        assert_eq!(last.days(), 31);
        assert_eq!(Month::new(1, 1).unwrap().previous(), None);
    }

    #[test]
    fn test_trailing_wraps_year() {
        let months: Vec<(i32, u32)> = Month::new(2024, 2)
            .unwrap()
            .trailing(TREND_MONTHS)
            .iter()
            .map(|m| (m.year(), m.month()))
            .collect();
        assert_eq!(
            months,
            vec![(2024, 2), (2024, 1), (2023, 12), (2023, 11), (2023, 10), (2023, 9)]
        );
    }

    #[test]
    fn test_monthly_report_counts_distinct_days() {
        let month = Month::new(2024, 4).unwrap();
        let users = vec![user(1, "asha"), user(2, "ravi")];
        let records = vec![
            at(1, 1, 2024, 4, 1, 9),
            at(2, 1, 2024, 4, 1, 17), // same day again
            at(3, 1, 2024, 4, 2, 9),
            at(4, 1, 2024, 5, 1, 9), // next month
            at(5, 2, 2024, 3, 31, 9), // previous month
        ];

        let rows = monthly_report(&month, &users, &records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].total_working_days, 30);
        assert_eq!(rows[0].total_days_present, 2);
        assert!((rows[0].monthly_attendance_percentage - 200.0 / 30.0).abs() < 1e-9);
        assert_eq!(
            rows[0].daily_log,
            vec!["2024-04-01T09:00:00", "2024-04-01T17:00:00", "2024-04-02T09:00:00"]
        );
        assert_eq!(rows[1].total_days_present, 0);
        assert!(rows[1].daily_log.is_empty());
    }

    #[test]
    fn test_analytics_trend_uses_distinct_users() {
        let month = Month::new(2024, 1).unwrap();
        let users = vec![user(1, "asha"), user(2, "ravi"), user(3, "mina"), user(4, "joe")];
        let records = vec![
            at(1, 1, 2024, 1, 3, 9),
            at(2, 1, 2024, 1, 4, 9),
            at(3, 2, 2024, 1, 4, 9),
            at(4, 3, 2023, 12, 20, 9),
        ];

        let analytics = monthly_analytics(&month, &users, &records, &AnalyticsPolicy::default());
        let trend = &analytics.average_attendance_last_6_months;
        assert_eq!(trend.len(), 6);
        assert_eq!((trend[0].year, trend[0].month), (2024, 1));
        assert_eq!(trend[0].average_attendance, 50.0);
        assert_eq!((trend[1].year, trend[1].month), (2023, 12));
        assert_eq!(trend[1].average_attendance, 25.0);
        assert_eq!(trend[5].average_attendance, 0.0);
    }

    #[test]
    fn test_analytics_full_attendance_and_defaulters() {
        let month = Month::new(2024, 1).unwrap();
        let users = vec![user(1, "asha"), user(2, "ravi")];
        let policy = AnalyticsPolicy {
            working_days: 4,
            defaulter_threshold_pct: 75.0,
        };
        let mut records: Vec<AttendanceRecord> =
            (1..=5).map(|d| at(d as i64, 1, 2024, 1, d, 9)).collect();
        records.push(at(10, 2, 2024, 1, 2, 9));
        records.push(at(11, 2, 2024, 1, 3, 9));

        let analytics = monthly_analytics(&month, &users, &records, &policy);
        assert_eq!(analytics.full_attendance_users, vec!["asha".to_string()]);
        assert_eq!(
            analytics.defaulters_list,
            vec![Defaulter {
                name: "ravi".to_string(),
                attendance_percentage: 50.0
            }]
        );
    }

    #[test]
    fn test_analytics_no_users() {
        let month = Month::new(2024, 1).unwrap();
        let analytics = monthly_analytics(&month, &[], &[], &AnalyticsPolicy::default());
        assert!(analytics
            .average_attendance_last_6_months
            .iter()
            .all(|m| m.average_attendance == 0.0));
        assert!(analytics.full_attendance_users.is_empty());
        assert!(analytics.defaulters_list.is_empty());
    }

    #[test]
    fn test_calendar_marks_present_days() {
        let month = Month::new(2024, 1).unwrap();
        let records = vec![
            at(1, 1, 2024, 1, 5, 9),
            at(2, 1, 2024, 1, 5, 18),
            at(3, 1, 2024, 1, 17, 9),
            at(4, 1, 2024, 2, 1, 9),
        ];
        let calendar = monthly_calendar(&month, &records);
        assert_eq!(calendar.len(), 2);
        assert_eq!(calendar.get(&5), Some(&"Present"));
        assert_eq!(calendar.get(&17), Some(&"Present"));

        let json = serde_json::to_value(&calendar).unwrap();
        assert_eq!(json, serde_json::json!({"5": "Present", "17": "Present"}));
    }
}
