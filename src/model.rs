use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::HOURS_PER_DAY;

/// Project id whose time entries are company holidays; never counted as actual work.
pub const HOLIDAY_PROJECT_ID: &str = "FRINGE.HOL";

/// Project id used for paid time off entries.
pub const PTO_PROJECT_ID: &str = "FRINGE.PTO";

/// Allocation FTE above which the value is read as absolute hours.
pub const FTE_HOURS_THRESHOLD: f64 = 1.0;

/// Optional single-dimension filter for metrics queries.
///
/// A query is scoped to one project or one employee, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Project(String),
    Employee(String),
}

impl Constraint {
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Constraint::Project(id) => Some(id),
            Constraint::Employee(_) => None,
        }
    }

    pub fn employee_id(&self) -> Option<&str> {
        match self {
            Constraint::Employee(id) => Some(id),
            Constraint::Project(_) => None,
        }
    }
}

/// One row of actual work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub employee_id: String,
    pub project_id: String,
    pub date: NaiveDate,
    pub hours: f64,
    pub billable: bool,
    /// Fixed amount; takes precedence over `hours * rate` when non-zero.
    pub amount: Option<f64>,
    pub description: Option<String>,
}

impl TimeEntry {
    /// Revenue for this entry given the matching allocation's bill rate.
    pub fn revenue(&self, bill_rate: Option<f64>) -> f64 {
        match self.amount {
            Some(amount) if amount != 0.0 => amount,
            _ => bill_rate.map(|rate| self.hours * rate).unwrap_or(0.0),
        }
    }
}

/// Planned work for one employee on one project in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub employee_id: String,
    pub project_id: String,
    /// Always the first of the month.
    pub allocation_date: NaiveDate,
    pub allocated_fte: f64,
    pub bill_rate: Option<f64>,
    pub working_days: Option<u32>,
    pub remaining_days: Option<u32>,
}

impl Allocation {
    /// Whether `allocated_fte` holds absolute hours rather than a multiplier.
    pub fn is_hours_override(&self) -> bool {
        self.allocated_fte > FTE_HOURS_THRESHOLD
    }

    /// Planned hours for a month with `working_days` business days.
    ///
    /// Values above 1.0 are taken as absolute hours.
    pub fn planned_hours(&self, working_days: u32) -> f64 {
        if self.is_hours_override() {
            self.allocated_fte
        } else {
            working_days as f64 * HOURS_PER_DAY * self.allocated_fte
        }
    }

    /// Planned hours still ahead with `remaining_days` business days left.
    ///
    /// An hours override yields no remaining projection.
    pub fn remaining_hours(&self, remaining_days: u32) -> f64 {
        if self.is_hours_override() {
            0.0
        } else {
            remaining_days as f64 * HOURS_PER_DAY * self.allocated_fte
        }
    }

    pub fn revenue_for(&self, hours: f64) -> f64 {
        self.bill_rate.map(|rate| hours * rate).unwrap_or(0.0)
    }
}

/// Capacity attributes of an employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub billable: bool,
    /// Nominal FTE target, 0-1. Absent means 1.0.
    pub target_allocation: Option<f64>,
    /// Fraction reserved for non-project work, 0-1. Absent means 0.0.
    pub overhead_allocation: Option<f64>,
    /// Hourly cost rate.
    pub cost_rate: Option<f64>,
    pub hire_date: Option<NaiveDate>,
    pub term_date: Option<NaiveDate>,
}

impl Employee {
    pub fn target(&self) -> f64 {
        self.target_allocation.unwrap_or(1.0)
    }

    pub fn overhead(&self) -> f64 {
        self.overhead_allocation.unwrap_or(0.0)
    }

    /// Employment interval, open-ended on either side when a date is missing.
    pub fn employment(&self) -> (NaiveDate, NaiveDate) {
        (
            self.hire_date.unwrap_or(NaiveDate::MIN),
            self.term_date.unwrap_or(NaiveDate::MAX),
        )
    }

    pub fn terminated_before(&self, date: NaiveDate) -> bool {
        self.term_date.is_some_and(|t| t < date)
    }

    pub fn hired_after(&self, date: NaiveDate) -> bool {
        self.hire_date.is_some_and(|h| h > date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub client: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub contract_value: Option<f64>,
    pub budget_used: Option<f64>,
}
