pub mod month;

pub use month::YearMonth;

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::date_util::{count_weekdays, days_in_month, first_day_of_month, last_day_of_month};
use crate::error::{Error, Result};

/// Working days assumed for a month with no reference row.
pub const DEFAULT_WORKING_DAYS: u32 = 21;

/// Hours in one working day.
pub const HOURS_PER_DAY: f64 = 8.0;

/// Operator-maintained business-day counts for one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthReference {
    pub year: i32,
    pub month: u32,
    pub working_days: u32,
    pub holidays: u32,
}

impl MonthReference {
    pub fn key(&self) -> Result<YearMonth> {
        YearMonth::new(self.year, self.month)
    }
}

/// Where a month sits relative to the reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthPhase {
    Past,
    Current,
    Future,
}

/// Classify `month` against the month containing `today`.
pub fn classify_month(month: YearMonth, today: NaiveDate) -> MonthPhase {
    let current = YearMonth::of(today);
    match month.cmp(&current) {
        std::cmp::Ordering::Less => MonthPhase::Past,
        std::cmp::Ordering::Equal => MonthPhase::Current,
        std::cmp::Ordering::Greater => MonthPhase::Future,
    }
}

/// Business-day breakdown for a month as seen from a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkingDays {
    pub year: i32,
    pub month: u32,
    pub total_days: u32,
    pub working_days: u32,
    pub worked_days: u32,
    pub remaining_days: u32,
}

/// Compute working, worked and remaining business days for a month.
///
/// `working_days_override` replaces the weekday count verbatim. Past months are
/// fully worked, future months fully remaining; for the current month the
/// weekdays from the 1st through `today` count as worked.
pub fn calculate_working_days(
    year: i32,
    month: u32,
    working_days_override: Option<u32>,
    today: NaiveDate,
) -> Result<WorkingDays> {
    if !(1..=12).contains(&month) {
        return Err(Error::InvalidMonth(month));
    }
    let first = first_day_of_month(year, month)?;
    let last = last_day_of_month(year, month)?;
    let total_days = days_in_month(year, month)?;
    let working_days = working_days_override.unwrap_or_else(|| count_weekdays(first, last));

    let (worked_days, remaining_days) = match classify_month(YearMonth::new(year, month)?, today) {
        MonthPhase::Past => (working_days, 0),
        MonthPhase::Future => (0, working_days),
        MonthPhase::Current => {
            let worked = count_weekdays(first, today);
            (worked, working_days.saturating_sub(worked))
        }
    };

    Ok(WorkingDays {
        year,
        month,
        total_days,
        working_days,
        worked_days,
        remaining_days,
    })
}

/// The month reference table, keyed by month.
#[derive(Debug, Clone, Default)]
pub struct MonthTable {
    rows: BTreeMap<YearMonth, MonthReference>,
}

impl MonthTable {
    /// Build from repository rows. Rows with an out-of-range month are logged and skipped.
    pub fn from_rows(rows: impl IntoIterator<Item = MonthReference>) -> Self {
        let mut table = BTreeMap::new();
        for row in rows {
            match row.key() {
                Ok(key) => {
                    table.insert(key, row);
                }
                Err(e) => log::warn!("Skipping month reference row {}-{}: {e}", row.year, row.month),
            }
        }
        Self { rows: table }
    }

    pub fn get(&self, month: YearMonth) -> Option<&MonthReference> {
        self.rows.get(&month)
    }

    pub fn working_days(&self, month: YearMonth) -> Option<u32> {
        self.get(month).map(|r| r.working_days)
    }

    /// Reference working days, or [`DEFAULT_WORKING_DAYS`] when the month has no row.
    pub fn expected_working_days(&self, month: YearMonth) -> u32 {
        match self.working_days(month) {
            Some(days) => days,
            None => {
                log::debug!("No month reference for {month}, assuming {DEFAULT_WORKING_DAYS} working days");
                DEFAULT_WORKING_DAYS
            }
        }
    }

    /// Reference rows whose month intersects `[start, end]`.
    pub fn rows_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<(YearMonth, MonthReference)> {
        if start > end {
            return Vec::new();
        }
        self.rows
            .range(YearMonth::of(start)..=YearMonth::of(end))
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    /// Working-day breakdown for `month`, treating the reference row as authoritative
    /// and falling back to a weekday count.
    pub fn working_days_for(&self, month: YearMonth, today: NaiveDate) -> WorkingDays {
        let breakdown =
            calculate_working_days(month.year(), month.month(), self.working_days(month), today);
        // YearMonth guarantees a valid month, so the calculation cannot fail.
        breakdown.unwrap_or(WorkingDays {
            year: month.year(),
            month: month.month(),
            total_days: month.days_in_month(),
            working_days: DEFAULT_WORKING_DAYS,
            worked_days: 0,
            remaining_days: DEFAULT_WORKING_DAYS,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&YearMonth, &MonthReference)> {
        self.rows.iter()
    }
}

/// Calculated reference row for a month: weekday count, no holidays.
pub fn calculated_month_reference(year: i32, month: u32) -> Result<MonthReference> {
    let first = first_day_of_month(year, month)?;
    let last = last_day_of_month(year, month)?;
    Ok(MonthReference {
        year,
        month,
        working_days: count_weekdays(first, last),
        holidays: 0,
    })
}

/// Check an operator edit: working days plus holidays must fit in the month.
pub fn validate_month_reference(row: &MonthReference) -> Result<()> {
    let total = days_in_month(row.year, row.month)?;
    if row.working_days + row.holidays > total {
        return Err(Error::Validation(format!(
            "working days ({}) + holidays ({}) exceed the {} days of {}-{:02}",
            row.working_days, row.holidays, total, row.year, row.month
        )));
    }
    Ok(())
}

/// Today's date in local time.
pub fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}
