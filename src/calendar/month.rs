use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::date_util::{last_day_of_month, MONTH_NAMES};
use crate::error::{Error, Result};

static RE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)\.?\s+(\d{4})$").unwrap());
static RE_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})$").unwrap());

/// A calendar month, the primary key of every monthly metrics map.
///
/// Ordering is chronological. The human-readable `"March 2025"` form only
/// appears at the serialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidMonth(month));
        }
        Ok(Self { year, month })
    }

    /// The month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn last_day(&self) -> NaiveDate {
        last_day_of_month(self.year, self.month).unwrap_or_default()
    }

    pub fn days_in_month(&self) -> u32 {
        self.last_day().day()
    }

    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// All months from `start` through `end`, inclusive. Empty if `start > end`.
    pub fn range_inclusive(start: YearMonth, end: YearMonth) -> Vec<YearMonth> {
        let mut months = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            months.push(cursor);
            cursor = cursor.succ();
        }
        months
    }

    /// Full month name, e.g. `"March"`.
    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }

    /// Serialized map-key form, e.g. `"March 2025"`.
    pub fn label(&self) -> String {
        format!("{} {}", self.month_name(), self.year)
    }

    /// Parse a month label.
    ///
    /// Supported formats:
    /// - `March 2025` / `march 2025` : full month name
    /// - `Mar 2025` : three-letter abbreviation
    /// - `2025-03` : numeric
    pub fn parse_label(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(caps) = RE_LABEL.captures(s) {
            let name = caps[1].to_lowercase();
            let year: i32 = caps[2]
                .parse()
                .map_err(|_| Error::MonthLabel(s.to_string()))?;
            let month = MONTH_NAMES
                .iter()
                .position(|m| {
                    let m = m.to_lowercase();
                    m == name || (name.len() == 3 && m.starts_with(&name))
                })
                .ok_or_else(|| Error::MonthLabel(s.to_string()))?;
            return Self::new(year, month as u32 + 1);
        }

        if let Some(caps) = RE_NUMERIC.captures(s) {
            let year: i32 = caps[1]
                .parse()
                .map_err(|_| Error::MonthLabel(s.to_string()))?;
            let month: u32 = caps[2]
                .parse()
                .map_err(|_| Error::MonthLabel(s.to_string()))?;
            return Self::new(year, month).map_err(|_| Error::MonthLabel(s.to_string()));
        }

        Err(Error::MonthLabel(s.to_string()))
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month_name(), self.year)
    }
}

impl FromStr for YearMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_label(s)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_label(&s).map_err(serde::de::Error::custom)
    }
}
