use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::{calculate_working_days, MonthTable, YearMonth};
use crate::model::{Allocation, TimeEntry};

/// One employee-month of a project's burn plan.
#[derive(Debug, Clone, Serialize)]
pub struct BurnMonth {
    pub month: YearMonth,
    pub allocated_fte: f64,
    pub bill_rate: Option<f64>,
    pub working_days: u32,
    pub remaining_days: u32,
    /// Working or remaining days come from the allocation rather than the calendar.
    pub days_customized: bool,
    pub possible_hours: f64,
    pub projected_hours: f64,
    pub actual_hours: f64,
    /// Actual plus projected.
    pub total_hours: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BurnEmployee {
    pub employee_id: String,
    pub months: Vec<BurnMonth>,
    pub total_hours: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BurnPlan {
    pub project_id: String,
    pub employees: Vec<BurnEmployee>,
    pub total_hours: f64,
    pub total_cost: f64,
}

/// Month-by-month hours plan for a project, per allocated employee.
///
/// Working days come from the allocation override, then the month reference
/// table, then a weekday count; remaining days from the allocation override,
/// then the calendar as of `today`.
pub fn build_burn_plan(
    project_id: &str,
    allocations: &[Allocation],
    time_entries: &[TimeEntry],
    months: &MonthTable,
    today: NaiveDate,
) -> BurnPlan {
    let mut actual: HashMap<(&str, YearMonth), f64> = HashMap::new();
    for e in time_entries.iter().filter(|e| e.project_id == project_id) {
        *actual
            .entry((e.employee_id.as_str(), YearMonth::of(e.date)))
            .or_default() += e.hours;
    }

    let mut by_employee: BTreeMap<&str, Vec<BurnMonth>> = BTreeMap::new();
    for a in allocations.iter().filter(|a| a.project_id == project_id) {
        let month = YearMonth::of(a.allocation_date);
        let base_days = a.working_days.or_else(|| months.working_days(month));
        let calendar = calculate_working_days(month.year(), month.month(), base_days, today)
            .unwrap_or_else(|_| months.working_days_for(month, today));
        let remaining_days = a.remaining_days.unwrap_or(calendar.remaining_days);

        let possible_hours = a.planned_hours(calendar.working_days);
        let projected_hours = a.remaining_hours(remaining_days);
        let actual_hours = actual
            .get(&(a.employee_id.as_str(), month))
            .copied()
            .unwrap_or(0.0);
        let total_hours = actual_hours + projected_hours;

        by_employee.entry(a.employee_id.as_str()).or_default().push(BurnMonth {
            month,
            allocated_fte: a.allocated_fte,
            bill_rate: a.bill_rate,
            working_days: calendar.working_days,
            remaining_days,
            days_customized: a.working_days.is_some() || a.remaining_days.is_some(),
            possible_hours,
            projected_hours,
            actual_hours,
            total_hours,
            total_cost: a.revenue_for(total_hours),
        });
    }

    let employees: Vec<BurnEmployee> = by_employee
        .into_iter()
        .map(|(id, mut months)| {
            months.sort_by_key(|m| m.month);
            BurnEmployee {
                employee_id: id.to_string(),
                total_hours: months.iter().map(|m| m.total_hours).sum(),
                total_cost: months.iter().map(|m| m.total_cost).sum(),
                months,
            }
        })
        .collect();

    BurnPlan {
        project_id: project_id.to_string(),
        total_hours: employees.iter().map(|e| e.total_hours).sum(),
        total_cost: employees.iter().map(|e| e.total_cost).sum(),
        employees,
    }
}
