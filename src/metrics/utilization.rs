use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::types::{MetricEntry, MonthlyMetrics, PerformanceMetrics};
use super::RateBook;
use crate::calendar::{YearMonth, HOURS_PER_DAY};
use crate::date_util::safe_ratio;
use crate::model::{Allocation, Employee, TimeEntry, PTO_PROJECT_ID};

/// Upper bound for utilization percentages.
pub const MAX_UTILIZATION_PCT: f64 = 200.0;

/// Monthly utilization of one employee.
#[derive(Debug, Clone, Serialize)]
pub struct UtilizationRow {
    pub employee_id: String,
    pub name: String,
    pub month: YearMonth,
    pub target_allocation: f64,
    pub overhead_allocation: f64,
    /// Sum of allocated FTE across the employee's allocations.
    pub allocated_fte: f64,
    /// Mean bill rate across allocations that carry one.
    pub avg_bill_rate: Option<f64>,
    pub expected_hours: f64,
    pub total_hours: f64,
    pub billable_hours: f64,
    /// Total hours against expected, percent, clamped to 0-200.
    pub utilization_rate: f64,
    /// Billable hours against expected, percent, clamped to 0-200.
    pub billable_utilization: f64,
    /// Share of worked hours that were billable, percent.
    pub billable_rate: f64,
    pub revenue_generated: f64,
    pub monthly_cost: f64,
}

#[derive(Debug, Default)]
struct AllocationSummary {
    fte: f64,
    rate_sum: f64,
    rate_count: u32,
}

impl AllocationSummary {
    fn avg_rate(&self) -> Option<f64> {
        (self.rate_count > 0).then(|| self.rate_sum / self.rate_count as f64)
    }
}

#[derive(Debug, Default)]
struct HoursSummary {
    total: f64,
    billable: f64,
    revenue: f64,
    entries: u32,
}

/// Utilization per employee for `target` (default: the month containing `today`).
///
/// Employees terminated before the month are dropped. Only time entries dated
/// inside the month count.
pub fn calculate_employee_utilization(
    employees: &[Employee],
    allocations: &[Allocation],
    time_entries: &[TimeEntry],
    working_days_in_month: u32,
    target: Option<YearMonth>,
    today: NaiveDate,
) -> Vec<UtilizationRow> {
    let month = target.unwrap_or_else(|| YearMonth::of(today));
    let rates = RateBook::from_allocations(allocations);

    let mut by_alloc: HashMap<&str, AllocationSummary> = HashMap::new();
    for a in allocations {
        let s = by_alloc.entry(a.employee_id.as_str()).or_default();
        s.fte += a.allocated_fte;
        if let Some(rate) = a.bill_rate {
            s.rate_sum += rate;
            s.rate_count += 1;
        }
    }

    let mut by_hours: HashMap<&str, HoursSummary> = HashMap::new();
    for e in time_entries.iter().filter(|e| YearMonth::of(e.date) == month) {
        let s = by_hours.entry(e.employee_id.as_str()).or_default();
        s.total += e.hours;
        if e.billable {
            s.billable += e.hours;
        }
        let rate = rates.rate_for(&e.employee_id, &e.project_id, e.date);
        s.revenue += e.revenue(rate);
        s.entries += 1;
    }

    let empty_alloc = AllocationSummary::default();
    let empty_hours = HoursSummary::default();

    employees
        .iter()
        .filter(|emp| !emp.terminated_before(month.first_day()))
        .map(|emp| {
            let alloc = by_alloc.get(emp.id.as_str()).unwrap_or(&empty_alloc);
            let hours = by_hours.get(emp.id.as_str()).unwrap_or(&empty_hours);
            let target_allocation = emp.target();
            let overhead_allocation = emp.overhead();

            let expected_hours = target_allocation
                * working_days_in_month as f64
                * HOURS_PER_DAY
                * (1.0 - overhead_allocation);

            let revenue_generated = if hours.entries > 0 {
                hours.revenue
            } else {
                let effective_rate = emp.cost_rate.or(alloc.avg_rate()).unwrap_or(0.0);
                hours.billable * effective_rate
            };
            let monthly_cost = emp.cost_rate.unwrap_or(0.0)
                * target_allocation
                * working_days_in_month as f64
                * HOURS_PER_DAY;

            UtilizationRow {
                employee_id: emp.id.clone(),
                name: emp.name.clone(),
                month,
                target_allocation,
                overhead_allocation,
                allocated_fte: alloc.fte,
                avg_bill_rate: alloc.avg_rate(),
                expected_hours,
                total_hours: hours.total,
                billable_hours: hours.billable,
                utilization_rate: clamped_pct(hours.total, expected_hours),
                billable_utilization: clamped_pct(hours.billable, expected_hours),
                billable_rate: safe_ratio(hours.billable, hours.total) * 100.0,
                revenue_generated,
                monthly_cost,
            }
        })
        .collect()
}

fn clamped_pct(hours: f64, expected: f64) -> f64 {
    (safe_ratio(hours, expected) * 100.0).clamp(0.0, MAX_UTILIZATION_PCT)
}

/// Year-to-date capacity and billable totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct YtdUtilization {
    pub possible_hours: f64,
    pub billable_hours: f64,
    pub utilization_pct: f64,
}

/// Sum possible and billable hours for one employee from January through `through`.
///
/// `possible` values are already prorated for partial-month employment.
pub fn calculate_ytd_utilization(
    possible: &MonthlyMetrics,
    actuals: &MonthlyMetrics,
    employee_id: &str,
    through: YearMonth,
) -> YtdUtilization {
    let mut ytd = YtdUtilization::default();
    for m in 1..=through.month() {
        let Ok(month) = YearMonth::new(through.year(), m) else {
            continue;
        };
        if let Some(p) = possible.get(&month).and_then(|b| b.get(employee_id)) {
            ytd.possible_hours += p.hours;
        }
        if let Some(a) = actuals.get(&month).and_then(|b| b.get(employee_id)) {
            ytd.billable_hours += a.billable_hours.unwrap_or(0.0);
        }
    }
    ytd.utilization_pct = safe_ratio(ytd.billable_hours, ytd.possible_hours) * 100.0;
    ytd
}

/// Coarse band of billable utilization against capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UtilizationStatus {
    /// Above 120%.
    Over,
    /// 100-120%.
    High,
    /// 80-100%.
    Good,
    Under,
}

impl UtilizationStatus {
    pub fn from_pct(pct: f64) -> Self {
        if pct > 120.0 {
            UtilizationStatus::Over
        } else if pct >= 100.0 {
            UtilizationStatus::High
        } else if pct >= 80.0 {
            UtilizationStatus::Good
        } else {
            UtilizationStatus::Under
        }
    }
}

/// One line of the monthly utilization report.
#[derive(Debug, Clone, Serialize)]
pub struct UtilizationReportRow {
    pub employee_id: String,
    pub name: String,
    pub possible_hours: f64,
    pub projected_hours: f64,
    pub actual_hours: f64,
    pub billable_hours: f64,
    pub pto_hours: f64,
    /// Non-billable hours other than PTO.
    pub other_nonbillable_hours: f64,
    pub utilization_pct: f64,
    /// Actual minus projected hours.
    pub variance: f64,
    pub days_with_entries: u32,
    pub status: UtilizationStatus,
    pub ytd: YtdUtilization,
}

/// Billable utilization report for `month`.
///
/// `month_metrics` covers the month alone, `ytd_metrics` January through the
/// month; both unconstrained. `time_entries` supplies PTO hours.
pub fn utilization_report(
    employees: &[Employee],
    month_metrics: &PerformanceMetrics,
    ytd_metrics: &PerformanceMetrics,
    time_entries: &[TimeEntry],
    month: YearMonth,
) -> Vec<UtilizationReportRow> {
    let mut pto: HashMap<&str, f64> = HashMap::new();
    for e in time_entries
        .iter()
        .filter(|e| e.project_id == PTO_PROJECT_ID && YearMonth::of(e.date) == month)
    {
        *pto.entry(e.employee_id.as_str()).or_default() += e.hours;
    }

    let lookup = |map: &MonthlyMetrics, id: &str| -> MetricEntry {
        map.get(&month)
            .and_then(|b| b.get(id))
            .cloned()
            .unwrap_or_default()
    };

    employees
        .iter()
        .filter(|emp| emp.billable)
        .filter(|emp| !emp.hired_after(month.last_day()) && !emp.terminated_before(month.first_day()))
        .map(|emp| {
            let actual = lookup(&month_metrics.actuals, &emp.id);
            let projected = lookup(&month_metrics.projected, &emp.id);
            let possible = lookup(&month_metrics.possible, &emp.id);

            let billable_hours = actual.billable_hours.unwrap_or(0.0);
            let pto_hours = pto.get(emp.id.as_str()).copied().unwrap_or(0.0);
            let utilization_pct = safe_ratio(billable_hours, possible.hours) * 100.0;

            UtilizationReportRow {
                employee_id: emp.id.clone(),
                name: emp.name.clone(),
                possible_hours: possible.hours,
                projected_hours: projected.hours,
                actual_hours: actual.hours,
                billable_hours,
                pto_hours,
                other_nonbillable_hours: actual.hours - billable_hours - pto_hours,
                utilization_pct,
                variance: actual.hours - projected.hours,
                days_with_entries: actual.worked_days,
                status: UtilizationStatus::from_pct(utilization_pct),
                ytd: calculate_ytd_utilization(
                    &ytd_metrics.possible,
                    &ytd_metrics.actuals,
                    &emp.id,
                    month,
                ),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn employee(id: &str, target: f64, overhead: f64) -> Employee {
        Employee {
            id: id.into(),
            name: format!("Employee {id}"),
            billable: true,
            target_allocation: Some(target),
            overhead_allocation: Some(overhead),
            cost_rate: None,
            hire_date: None,
            term_date: None,
        }
    }

    fn entry(d: NaiveDate, hours: f64, billable: bool) -> TimeEntry {
        TimeEntry {
            employee_id: "e".into(),
            project_id: "p1".into(),
            date: d,
            hours,
            billable,
            amount: None,
            description: None,
        }
    }

    fn allocation(rate: f64) -> Allocation {
        Allocation {
            employee_id: "e".into(),
            project_id: "p1".into(),
            allocation_date: date(2025, 3, 1),
            allocated_fte: 0.5,
            bill_rate: Some(rate),
            working_days: None,
            remaining_days: None,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_utilization_scenario() {
        let mut fixed = entry(date(2025, 3, 5), 10.0, true);
        fixed.amount = Some(500.0);
        let entries = vec![
            entry(date(2025, 3, 3), 20.0, true),
            entry(date(2025, 3, 4), 10.0, true),
            fixed,
            entry(date(2025, 3, 6), 20.0, false),
        ];

        let rows = calculate_employee_utilization(
            &[employee("e", 0.5, 0.1)],
            &[allocation(100.0)],
            &entries,
            22,
            Some(ym(2025, 3)),
            date(2025, 6, 1),
        );
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert!(close(r.expected_hours, 79.2), "expected {}", r.expected_hours);
        assert!(close(r.utilization_rate, 75.76), "utilization {}", r.utilization_rate);
        assert!(close(r.billable_utilization, 50.51), "billable {}", r.billable_utilization);
        assert!(close(r.billable_rate, 66.67), "rate {}", r.billable_rate);
        // 50h at the allocation rate plus the fixed-amount entry
        assert!(close(r.revenue_generated, 50.0 * 100.0 + 500.0));
        assert_eq!(r.avg_bill_rate, Some(100.0));
        assert_eq!(r.allocated_fte, 0.5);
    }

    #[test]
    fn test_utilization_clamped() {
        let entries = vec![entry(date(2025, 3, 3), 10_000.0, true)];
        let rows = calculate_employee_utilization(
            &[employee("e", 1.0, 0.0)],
            &[],
            &entries,
            1,
            Some(ym(2025, 3)),
            date(2025, 6, 1),
        );
        assert_eq!(rows[0].expected_hours, 8.0);
        assert_eq!(rows[0].utilization_rate, MAX_UTILIZATION_PCT);
        assert_eq!(rows[0].billable_utilization, MAX_UTILIZATION_PCT);

        // No expected hours means 0, not infinity
        let rows = calculate_employee_utilization(
            &[employee("e", 1.0, 0.0)],
            &[],
            &entries,
            0,
            Some(ym(2025, 3)),
            date(2025, 6, 1),
        );
        assert_eq!(rows[0].utilization_rate, 0.0);
    }

    #[test]
    fn test_entries_outside_month_excluded() {
        let entries = vec![
            entry(date(2025, 2, 28), 8.0, true),
            entry(date(2025, 3, 3), 8.0, true),
            entry(date(2025, 4, 1), 8.0, true),
        ];
        let rows = calculate_employee_utilization(
            &[employee("e", 1.0, 0.0)],
            &[],
            &entries,
            21,
            Some(ym(2025, 3)),
            date(2025, 6, 1),
        );
        assert_eq!(rows[0].total_hours, 8.0);
    }

    #[test]
    fn test_terminated_employees_dropped_and_cost() {
        let mut gone = employee("gone", 1.0, 0.0);
        gone.term_date = Some(date(2025, 2, 27));
        let mut costed = employee("e", 0.5, 0.0);
        costed.cost_rate = Some(40.0);

        // Target month defaults to the month containing today
        let rows = calculate_employee_utilization(&[gone, costed], &[], &[], 20, None, date(2025, 3, 12));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].month, ym(2025, 3));
        assert_eq!(rows[0].monthly_cost, 40.0 * 0.5 * 20.0 * 8.0);
        assert_eq!(rows[0].billable_rate, 0.0);
    }

    fn bucket(map: &mut MonthlyMetrics, month: YearMonth, id: &str, hours: f64, billable: Option<f64>) {
        map.entry(month).or_default().insert(
            id.into(),
            MetricEntry { hours, revenue: 0.0, worked_days: 0, billable_hours: billable },
        );
    }

    #[test]
    fn test_ytd_sums_through_target_month() {
        let mut possible = MonthlyMetrics::new();
        let mut actuals = MonthlyMetrics::new();
        for m in 1..=4 {
            bucket(&mut possible, ym(2025, m), "e", 160.0, None);
            bucket(&mut actuals, ym(2025, m), "e", 150.0, Some(120.0));
        }
        let ytd = calculate_ytd_utilization(&possible, &actuals, "e", ym(2025, 3));
        assert_eq!(ytd.possible_hours, 480.0);
        assert_eq!(ytd.billable_hours, 360.0);
        assert!(close(ytd.utilization_pct, 75.0));

        let none = calculate_ytd_utilization(&possible, &actuals, "other", ym(2025, 3));
        assert_eq!(none.utilization_pct, 0.0);
    }

    #[test]
    fn test_report_row() {
        let march = ym(2025, 3);
        let mut month = PerformanceMetrics::default();
        bucket(&mut month.actuals, march, "e", 150.0, Some(120.0));
        bucket(&mut month.projected, march, "e", 160.0, None);
        bucket(&mut month.possible, march, "e", 140.0, None);

        let mut pto = entry(date(2025, 3, 10), 16.0, false);
        pto.project_id = PTO_PROJECT_ID.into();
        let mut late_hire = employee("late", 1.0, 0.0);
        late_hire.hire_date = Some(date(2025, 4, 1));

        let rows = utilization_report(
            &[employee("e", 1.0, 0.0), late_hire],
            &month,
            &month,
            &[pto],
            march,
        );
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.pto_hours, 16.0);
        assert_eq!(r.other_nonbillable_hours, 14.0);
        assert_eq!(r.variance, -10.0);
        assert!(close(r.utilization_pct, 85.71));
        assert_eq!(r.status, UtilizationStatus::Good);
        assert_eq!(r.ytd.possible_hours, 140.0);
    }

    #[test]
    fn test_status_bands() {
        assert_eq!(UtilizationStatus::from_pct(121.0), UtilizationStatus::Over);
        assert_eq!(UtilizationStatus::from_pct(100.0), UtilizationStatus::High);
        assert_eq!(UtilizationStatus::from_pct(80.0), UtilizationStatus::Good);
        assert_eq!(UtilizationStatus::from_pct(79.9), UtilizationStatus::Under);
    }
}
