pub mod budget;
pub mod burn;
pub mod cache;
pub mod reconcile;
pub mod types;
pub mod utilization;

pub use types::*;

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate};

use crate::calendar::{MonthTable, YearMonth, HOURS_PER_DAY};
use crate::date_util::overlap_days;
use crate::error::Result;
use crate::model::{Allocation, Constraint, Employee, TimeEntry, HOLIDAY_PROJECT_ID};
use crate::storage::{repository, Database};

/// Secondary key of every metrics map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Employee,
    Project,
}

impl GroupBy {
    /// An employee constraint breaks results out by project; anything else by employee.
    pub fn for_constraint(constraint: Option<&Constraint>) -> Self {
        match constraint {
            Some(Constraint::Employee(_)) => GroupBy::Project,
            _ => GroupBy::Employee,
        }
    }

    fn key<'a>(&self, employee_id: &'a str, project_id: &'a str) -> &'a str {
        match self {
            GroupBy::Employee => employee_id,
            GroupBy::Project => project_id,
        }
    }
}

/// Bill-rate fallback for time entries, looked up by (employee, project).
#[derive(Debug, Default)]
pub struct RateBook {
    rates: HashMap<(String, String), Vec<(NaiveDate, f64)>>,
}

impl RateBook {
    pub fn from_allocations(allocations: &[Allocation]) -> Self {
        let mut rates: HashMap<(String, String), Vec<(NaiveDate, f64)>> = HashMap::new();
        for a in allocations {
            if let Some(rate) = a.bill_rate {
                rates
                    .entry((a.employee_id.clone(), a.project_id.clone()))
                    .or_default()
                    .push((a.allocation_date, rate));
            }
        }
        for list in rates.values_mut() {
            list.sort_by_key(|(d, _)| *d);
        }
        Self { rates }
    }

    /// The rate of the allocation in the entry's month, else the earliest one on record.
    pub fn rate_for(&self, employee_id: &str, project_id: &str, date: NaiveDate) -> Option<f64> {
        let list = self
            .rates
            .get(&(employee_id.to_string(), project_id.to_string()))?;
        let month = YearMonth::of(date);
        list.iter()
            .find(|(d, _)| YearMonth::of(*d) == month)
            .or_else(|| list.first())
            .map(|(_, rate)| *rate)
    }
}

/// Fold time entries into the actuals map.
///
/// Holiday entries are skipped. `worked_days` counts distinct dates, so several
/// partial-day entries on one date count once.
pub fn aggregate_actuals(entries: &[TimeEntry], rates: &RateBook, group_by: GroupBy) -> MonthlyMetrics {
    let mut map = MonthlyMetrics::new();
    let mut dates: HashMap<(YearMonth, String), BTreeSet<NaiveDate>> = HashMap::new();

    for e in entries.iter().filter(|e| e.project_id != HOLIDAY_PROJECT_ID) {
        let month = YearMonth::of(e.date);
        let key = group_by.key(&e.employee_id, &e.project_id).to_string();
        let rate = rates.rate_for(&e.employee_id, &e.project_id, e.date);

        let slot = map.entry(month).or_default().entry(key.clone()).or_default();
        slot.hours += e.hours;
        slot.revenue += e.revenue(rate);
        let billable = slot.billable_hours.get_or_insert(0.0);
        if e.billable {
            *billable += e.hours;
        }
        dates.entry((month, key)).or_default().insert(e.date);
    }

    for ((month, key), days) in dates {
        if let Some(slot) = map.get_mut(&month).and_then(|m| m.get_mut(&key)) {
            slot.worked_days = days.len() as u32;
        }
    }
    map
}

/// Fold allocations into the projected map.
///
/// `worked_days` is the month's reference working days, not a lived count.
pub fn aggregate_projected(allocations: &[Allocation], months: &MonthTable, group_by: GroupBy) -> MonthlyMetrics {
    let mut map = MonthlyMetrics::new();
    for a in allocations {
        let month = YearMonth::of(a.allocation_date);
        let working_days = months.expected_working_days(month);
        let hours = a.planned_hours(working_days);

        let slot = map
            .entry(month)
            .or_default()
            .entry(group_by.key(&a.employee_id, &a.project_id).to_string())
            .or_default();
        slot.hours += hours;
        slot.revenue += a.revenue_for(hours);
        slot.worked_days = working_days;
    }
    map
}

/// Theoretical capacity of billable employees per reference month in `[start, end]`,
/// prorated for partial-month employment. Always keyed by employee; revenue is 0.
pub fn aggregate_possible(
    employees: &[Employee],
    months: &MonthTable,
    start: NaiveDate,
    end: NaiveDate,
) -> MonthlyMetrics {
    let mut map = MonthlyMetrics::new();
    let rows = months.rows_between(start, end);

    for emp in employees
        .iter()
        .filter(|e| e.billable && !e.terminated_before(start))
    {
        for (month, row) in &rows {
            let Some(factor) = proration_factor(emp, *month) else {
                continue;
            };
            let hours = row.working_days as f64
                * (emp.target() - emp.overhead())
                * HOURS_PER_DAY
                * factor;

            let slot = map.entry(*month).or_default().entry(emp.id.clone()).or_default();
            slot.hours += hours;
            slot.worked_days = row.working_days;
        }
    }
    map
}

/// Fraction of `month` the employee was employed, or `None` if not at all.
pub fn proration_factor(employee: &Employee, month: YearMonth) -> Option<f64> {
    let active = overlap_days(employee.employment(), (month.first_day(), month.last_day()))?;
    let total = month.days_in_month();
    if active >= total {
        Some(1.0)
    } else {
        Some(active as f64 / total as f64)
    }
}

/// Load the month reference table for the years spanned by `[start, end]`.
pub async fn load_month_table(db: &Database, start: NaiveDate, end: NaiveDate) -> Result<MonthTable> {
    let range = (start.year(), end.year());
    let rows = db
        .reader()
        .call(move |conn| repository::get_months(conn, Some(range)))
        .await?;
    Ok(MonthTable::from_rows(rows))
}

/// Build actuals, projected and possible for `[start, end]`.
///
/// The three maps come from separate reads and may observe slightly different snapshots.
pub async fn compute_performance_metrics(
    db: &Database,
    start: NaiveDate,
    end: NaiveDate,
    constraint: Option<&Constraint>,
) -> Result<PerformanceMetrics> {
    if start > end {
        log::debug!("Empty metrics range {start}..{end}");
        return Ok(PerformanceMetrics::default());
    }
    let group_by = GroupBy::for_constraint(constraint);
    let months = load_month_table(db, start, end).await?;

    let c = constraint.cloned();
    let (entries, rate_rows) = db
        .reader()
        .call(move |conn| {
            let entries = repository::get_time_entries(conn, start, end, c.as_ref())?;
            let rates = repository::get_rate_allocations(conn, c.as_ref())?;
            Ok::<_, rusqlite::Error>((entries, rates))
        })
        .await?;
    let actuals = aggregate_actuals(&entries, &RateBook::from_allocations(&rate_rows), group_by);

    let c = constraint.cloned();
    let allocations = db
        .reader()
        .call(move |conn| repository::get_allocations(conn, start, end, c.as_ref()))
        .await?;
    let projected = aggregate_projected(&allocations, &months, group_by);

    let c = constraint.cloned();
    let employees = db
        .reader()
        .call(move |conn| repository::get_employees(conn, c.as_ref()))
        .await?;
    let possible = aggregate_possible(&employees, &months, start, end);

    log::debug!(
        "Metrics {start}..{end}: {} time entries, {} allocations, {} employees",
        entries.len(),
        allocations.len(),
        employees.len()
    );

    Ok(PerformanceMetrics {
        actuals,
        projected,
        possible,
    })
}
