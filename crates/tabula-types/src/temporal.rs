//! Date, time and timestamp values
//!
//! All three types carry an explicit invalid sentinel instead of failing:
//! arithmetic on an invalid value yields the invalid value, and validity is a
//! queryable predicate. An invalid date is therefore a first-class runtime
//! outcome, not an error.
//!
//! Calendar conversion uses the days-from-civil algorithm over the proleptic
//! Gregorian calendar; absolute day 0 is 1970-01-01.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A calendar date.
///
/// `Date::INVALID` (all zero) is the sentinel for missing or unparseable
/// dates. Every constructor validates; every operation propagates the
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Date {
    year: i32,
    month: u8,
    day: u8,
}

impl Date {
    /// The invalid-date sentinel.
    pub const INVALID: Date = Date {
        year: 0,
        month: 0,
        day: 0,
    };

    /// Build a date, yielding [`Date::INVALID`] for out-of-range fields.
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        if !(1..=12).contains(&month) {
            return Date::INVALID;
        }
        if day < 1 || day > days_in_month(year, month as u8) as u32 {
            return Date::INVALID;
        }
        Date {
            year,
            month: month as u8,
            day: day as u8,
        }
    }

    /// Whether this date is an actual calendar day.
    pub fn is_valid(self) -> bool {
        self.month >= 1
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month as u32
    }

    pub fn day(self) -> u32 {
        self.day as u32
    }

    /// Days since 1970-01-01, or `None` if invalid.
    pub fn absolute_day(self) -> Option<i64> {
        if !self.is_valid() {
            return None;
        }
        Some(days_from_civil(
            self.year as i64,
            self.month as i64,
            self.day as i64,
        ))
    }

    /// Date at the given absolute day number.
    pub fn from_absolute_day(day: i64) -> Self {
        let (y, m, d) = civil_from_days(day);
        if y < i32::MIN as i64 || y > i32::MAX as i64 {
            return Date::INVALID;
        }
        Date {
            year: y as i32,
            month: m as u8,
            day: d as u8,
        }
    }

    /// Shift by a number of days; invalid in, invalid out.
    pub fn add_days(self, days: i64) -> Date {
        match self.absolute_day() {
            Some(abs) => Date::from_absolute_day(abs + days),
            None => Date::INVALID,
        }
    }

    /// Signed day difference `self - other`, or `None` if either is invalid.
    pub fn diff_days(self, other: Date) -> Option<i64> {
        Some(self.absolute_day()? - other.absolute_day()?)
    }

    /// Day of year, 1-based; `None` if invalid.
    pub fn year_day(self) -> Option<u32> {
        let first = Date::new(self.year, 1, 1);
        self.diff_days(first).map(|d| d as u32 + 1)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("Invalid");
        }
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A time of day with fractional seconds.
///
/// `Time::INVALID` uses an out-of-range hour as sentinel.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Time {
    hour: u8,
    minute: u8,
    second: f64,
}

impl Time {
    /// The invalid-time sentinel.
    pub const INVALID: Time = Time {
        hour: u8::MAX,
        minute: 0,
        second: 0.0,
    };

    /// Build a time, yielding [`Time::INVALID`] for out-of-range fields.
    pub fn new(hour: u32, minute: u32, second: f64) -> Self {
        if hour >= 24 || minute >= 60 || !(0.0..60.0).contains(&second) {
            return Time::INVALID;
        }
        Time {
            hour: hour as u8,
            minute: minute as u8,
            second,
        }
    }

    pub fn is_valid(self) -> bool {
        self.hour < 24
    }

    pub fn hour(self) -> u32 {
        self.hour as u32
    }

    pub fn minute(self) -> u32 {
        self.minute as u32
    }

    pub fn second(self) -> f64 {
        self.second
    }

    /// Seconds since midnight, or `None` if invalid.
    pub fn day_second(self) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        Some(self.hour as f64 * 3600.0 + self.minute as f64 * 60.0 + self.second)
    }

    /// Decimal hour in `[0, 24)`, or `None` if invalid.
    pub fn decimal_hour(self) -> Option<f64> {
        self.day_second().map(|s| s / 3600.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("Invalid");
        }
        write!(f, "{:02}:{:02}:{:06.3}", self.hour, self.minute, self.second)
    }
}

/// A date plus a time of day.
///
/// Valid only when both halves are valid.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp {
    pub date: Date,
    pub time: Time,
}

impl Timestamp {
    /// The invalid-timestamp sentinel.
    pub const INVALID: Timestamp = Timestamp {
        date: Date::INVALID,
        time: Time::INVALID,
    };

    pub fn new(date: Date, time: Time) -> Self {
        Timestamp { date, time }
    }

    pub fn is_valid(self) -> bool {
        self.date.is_valid() && self.time.is_valid()
    }

    /// Seconds since 1970-01-01T00:00:00, or `None` if invalid.
    pub fn absolute_second(self) -> Option<f64> {
        let days = self.date.absolute_day()?;
        let secs = self.time.day_second()?;
        Some(days as f64 * 86_400.0 + secs)
    }

    /// Shift by (possibly fractional) seconds; invalid in, invalid out.
    pub fn add_seconds(self, seconds: f64) -> Timestamp {
        let Some(abs) = self.absolute_second() else {
            return Timestamp::INVALID;
        };
        let abs = abs + seconds;
        let day = (abs / 86_400.0).floor() as i64;
        let rem = abs - day as f64 * 86_400.0;
        let hour = (rem / 3600.0) as u32;
        let minute = ((rem - hour as f64 * 3600.0) / 60.0) as u32;
        let second = rem - hour as f64 * 3600.0 - minute as f64 * 60.0;
        Timestamp {
            date: Date::from_absolute_day(day),
            time: Time::new(hour.min(23), minute.min(59), second),
        }
    }

    /// Signed second difference `self - other`, or `None` if either invalid.
    pub fn diff_seconds(self, other: Timestamp) -> Option<f64> {
        Some(self.absolute_second()? - other.absolute_second()?)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("Invalid");
        }
        write!(f, "{} {}", self.date, self.time)
    }
}

/// Gregorian leap-year predicate.
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in a month.
pub fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Days since 1970-01-01 for a civil date (proleptic Gregorian).
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date for a day count since 1970-01-01.
fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Validate a date format string: tokens `YYYY`, `MM`, `DD`, each exactly
/// once, optionally separated by one of `-/.`.
pub fn is_valid_date_format(format: &str) -> bool {
    let stripped: String = format.chars().filter(|c| !"-/.".contains(*c)).collect();
    let mut rest = stripped.as_str();
    let mut seen = Vec::new();
    while !rest.is_empty() {
        let token = if rest.starts_with("YYYY") {
            "YYYY"
        } else if rest.starts_with("MM") {
            "MM"
        } else if rest.starts_with("DD") {
            "DD"
        } else {
            return false;
        };
        if seen.contains(&token) {
            return false;
        }
        seen.push(token);
        rest = &rest[token.len()..];
    }
    seen.len() == 3
}

/// Validate a time format string: `HH`, `MM`, optional `SS`, optionally
/// separated by `:` or `.`.
pub fn is_valid_time_format(format: &str) -> bool {
    matches!(
        format.replace([':', '.'], "").as_str(),
        "HHMM" | "HHMMSS"
    )
}

/// Validate a timestamp format string: date part + time part separated by a
/// space, `T` or nothing.
pub fn is_valid_timestamp_format(format: &str) -> bool {
    for sep in [" ", "T"] {
        if let Some((date_part, time_part)) = format.split_once(sep) {
            return is_valid_date_format(date_part) && is_valid_time_format(time_part);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_day_zero() {
        assert_eq!(Date::new(1970, 1, 1).absolute_day(), Some(0));
        assert_eq!(Date::from_absolute_day(0), Date::new(1970, 1, 1));
    }

    #[test]
    fn test_civil_round_trip() {
        for day in [-719_468, -1, 0, 1, 10_957, 18_628, 2_932_896] {
            let date = Date::from_absolute_day(day);
            assert_eq!(date.absolute_day(), Some(day));
        }
    }

    #[test]
    fn test_leap_years() {
        assert!(is_leap_year(2000));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2023));
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(1900, 2), 28);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(!Date::new(2024, 2, 30).is_valid());
        assert!(!Date::new(2024, 13, 1).is_valid());
        assert!(!Date::new(2024, 0, 1).is_valid());
        assert!(Date::new(2024, 2, 29).is_valid());
    }

    #[test]
    fn test_sentinel_propagation() {
        let bad = Date::INVALID;
        assert!(!bad.add_days(5).is_valid());
        assert_eq!(bad.diff_days(Date::new(2000, 1, 1)), None);
        assert_eq!(bad.absolute_day(), None);
    }

    #[test]
    fn test_add_days_across_month_end() {
        let d = Date::new(2024, 2, 28);
        assert_eq!(d.add_days(1), Date::new(2024, 2, 29));
        assert_eq!(d.add_days(2), Date::new(2024, 3, 1));
        assert_eq!(Date::new(2000, 1, 1).add_days(366), Date::new(2001, 1, 1));
    }

    #[test]
    fn test_diff_days() {
        let a = Date::new(2000, 1, 1);
        let b = Date::new(2000, 12, 31);
        assert_eq!(b.diff_days(a), Some(365)); // 2000 is a leap year
        assert_eq!(a.diff_days(b), Some(-365));
    }

    #[test]
    fn test_year_day() {
        assert_eq!(Date::new(2024, 1, 1).year_day(), Some(1));
        assert_eq!(Date::new(2024, 12, 31).year_day(), Some(366));
    }

    #[test]
    fn test_time_validity_and_seconds() {
        let t = Time::new(13, 30, 15.5);
        assert!(t.is_valid());
        assert_eq!(t.day_second(), Some(13.0 * 3600.0 + 30.0 * 60.0 + 15.5));
        assert!(!Time::new(24, 0, 0.0).is_valid());
        assert!(!Time::new(0, 60, 0.0).is_valid());
        assert_eq!(Time::INVALID.day_second(), None);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let ts = Timestamp::new(Date::new(2024, 12, 31), Time::new(23, 59, 30.0));
        let later = ts.add_seconds(45.0);
        assert_eq!(later.date, Date::new(2025, 1, 1));
        assert_eq!(later.time.hour(), 0);
        assert_eq!(later.time.minute(), 0);
        assert!((later.time.second() - 15.0).abs() < 1e-6);
        assert_eq!(later.diff_seconds(ts), Some(45.0));
        assert!(!Timestamp::INVALID.add_seconds(1.0).is_valid());
    }

    #[test]
    fn test_format_validation() {
        assert!(is_valid_date_format("YYYY-MM-DD"));
        assert!(is_valid_date_format("DD/MM/YYYY"));
        assert!(is_valid_date_format("YYYYMMDD"));
        assert!(!is_valid_date_format("YYYY-MM"));
        assert!(!is_valid_date_format("YYYY-MM-DD-DD"));
        assert!(is_valid_time_format("HH:MM:SS"));
        assert!(is_valid_time_format("HHMM"));
        assert!(!is_valid_time_format("HH"));
        assert!(is_valid_timestamp_format("YYYY-MM-DD HH:MM:SS"));
        assert!(is_valid_timestamp_format("YYYY-MM-DDTHH:MM"));
        assert!(!is_valid_timestamp_format("YYYY-MM-DD"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Date::new(2024, 3, 7).to_string(), "2024-03-07");
        assert_eq!(Date::INVALID.to_string(), "Invalid");
    }
}
