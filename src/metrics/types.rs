use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calendar::YearMonth;

/// Hours, revenue and day count for one entity in one month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub hours: f64,
    pub revenue: f64,
    /// Distinct dates with entries for actuals; the month's working days for
    /// projected and possible.
    pub worked_days: u32,
    /// Only tracked for actuals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable_hours: Option<f64>,
}

/// Month → entity id → entry. Months iterate chronologically.
pub type MonthlyMetrics = BTreeMap<YearMonth, BTreeMap<String, MetricEntry>>;

/// The three parallel views produced by the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub actuals: MonthlyMetrics,
    pub projected: MonthlyMetrics,
    pub possible: MonthlyMetrics,
}

impl PerformanceMetrics {
    pub fn is_empty(&self) -> bool {
        self.actuals.is_empty() && self.projected.is_empty() && self.possible.is_empty()
    }
}

/// Sum of revenue across every month and entity of a map.
pub fn total_revenue(map: &MonthlyMetrics) -> f64 {
    map.values().flat_map(|m| m.values()).map(|e| e.revenue).sum()
}

/// Sum of hours across every month and entity of a map.
pub fn total_hours(map: &MonthlyMetrics) -> f64 {
    map.values().flat_map(|m| m.values()).map(|e| e.hours).sum()
}

/// How a combined month was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthType {
    /// Actuals only.
    Past,
    /// Current month with business days left: actuals plus the unelapsed share of projected.
    Active,
    /// Projected only.
    Future,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedEntry {
    pub hours: f64,
    pub revenue: f64,
    pub worked_days: u32,
    pub month_type: MonthType,
}

pub type CombinedMetrics = BTreeMap<YearMonth, BTreeMap<String, CombinedEntry>>;

/// Metrics as they cross a serialization boundary, keyed by "Month YYYY" labels.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPerformanceMetrics {
    #[serde(default)]
    pub actuals: BTreeMap<String, BTreeMap<String, MetricEntry>>,
    #[serde(default)]
    pub projected: BTreeMap<String, BTreeMap<String, MetricEntry>>,
    #[serde(default)]
    pub possible: BTreeMap<String, BTreeMap<String, MetricEntry>>,
}

impl RawPerformanceMetrics {
    /// Re-key by month. Labels that do not parse are logged and dropped.
    pub fn into_keyed(self) -> PerformanceMetrics {
        PerformanceMetrics {
            actuals: key_by_month("actuals", self.actuals),
            projected: key_by_month("projected", self.projected),
            possible: key_by_month("possible", self.possible),
        }
    }
}

fn key_by_month(
    map_name: &str,
    raw: BTreeMap<String, BTreeMap<String, MetricEntry>>,
) -> MonthlyMetrics {
    let mut keyed = MonthlyMetrics::new();
    for (label, entities) in raw {
        match YearMonth::parse_label(&label) {
            Ok(month) => {
                keyed.entry(month).or_default().extend(entities);
            }
            Err(e) => log::warn!("Skipping {map_name} month {label:?}: {e}"),
        }
    }
    keyed
}
