use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::error::{Error, Result};

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Get the first day of a given month.
pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(Error::InvalidMonth(month))
}

/// Get the last day of a given month.
pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else if (1..12).contains(&month) {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    } else {
        None
    };
    next.map(|d| d - Duration::days(1))
        .ok_or(Error::InvalidMonth(month))
}

/// Number of calendar days in a month.
pub fn days_in_month(year: i32, month: u32) -> Result<u32> {
    Ok(last_day_of_month(year, month)?.day())
}

/// Count Monday-Friday dates in `[start, end]`, inclusive. Zero if `start > end`.
pub fn count_weekdays(start: NaiveDate, end: NaiveDate) -> u32 {
    let mut count = 0;
    let mut d = start;
    while d <= end {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            count += 1;
        }
        d += Duration::days(1);
    }
    count
}

/// Inclusive day count of the overlap between two date ranges, if any.
pub fn overlap_days(
    a: (NaiveDate, NaiveDate),
    b: (NaiveDate, NaiveDate),
) -> Option<u32> {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    if start > end {
        return None;
    }
    Some((end - start).num_days() as u32 + 1)
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_iso_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| Error::DateParse(format!("{s}: {e}")))
}

/// Divide, substituting 0 when the denominator is not positive.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
