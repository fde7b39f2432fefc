use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use super::types::{CombinedEntry, CombinedMetrics, MetricEntry, MonthType, MonthlyMetrics};
use crate::calendar::{classify_month, local_today, MonthPhase, MonthTable};

/// Merge actuals and projected into one chronological view.
///
/// Past months take actuals, future months take projected. The current month
/// takes actuals plus the share of projected that has not elapsed yet, measured
/// in business days; once no business days remain it is treated as past.
pub fn combine_actual_projected(
    actuals: &MonthlyMetrics,
    projected: &MonthlyMetrics,
    months: &MonthTable,
    reference_date: Option<NaiveDate>,
) -> CombinedMetrics {
    let today = reference_date.unwrap_or_else(local_today);
    let empty: BTreeMap<String, MetricEntry> = BTreeMap::new();
    let mut combined = CombinedMetrics::new();

    let all_months: BTreeSet<_> = actuals.keys().chain(projected.keys()).copied().collect();
    for month in all_months {
        let phase = classify_month(month, today);
        let expected = months.expected_working_days(month);
        let actual_bucket = actuals.get(&month).unwrap_or(&empty);
        let projected_bucket = projected.get(&month).unwrap_or(&empty);

        let entities: BTreeSet<&String> =
            actual_bucket.keys().chain(projected_bucket.keys()).collect();
        let out = combined.entry(month).or_default();

        for id in entities {
            let actual = actual_bucket.get(id);
            let planned = projected_bucket.get(id);

            let entry = match phase {
                MonthPhase::Past => as_past(actual),
                MonthPhase::Future => {
                    let fallback = MetricEntry {
                        worked_days: expected,
                        ..Default::default()
                    };
                    let p = planned.unwrap_or(&fallback);
                    CombinedEntry {
                        hours: p.hours,
                        revenue: p.revenue,
                        worked_days: p.worked_days,
                        month_type: MonthType::Future,
                    }
                }
                MonthPhase::Current => {
                    let worked = actual.map_or(0, |a| a.worked_days);
                    if worked < expected && expected > 0 {
                        let ratio = (expected - worked) as f64 / expected as f64;
                        let (a_hours, a_revenue) = actual.map_or((0.0, 0.0), |a| (a.hours, a.revenue));
                        let (p_hours, p_revenue) = planned.map_or((0.0, 0.0), |p| (p.hours, p.revenue));
                        CombinedEntry {
                            hours: a_hours + ratio * p_hours,
                            revenue: a_revenue + ratio * p_revenue,
                            worked_days: worked,
                            month_type: MonthType::Active,
                        }
                    } else {
                        as_past(actual)
                    }
                }
            };
            out.insert(id.clone(), entry);
        }
    }
    combined
}

fn as_past(actual: Option<&MetricEntry>) -> CombinedEntry {
    let a = actual.cloned().unwrap_or_default();
    CombinedEntry {
        hours: a.hours,
        revenue: a.revenue,
        worked_days: a.worked_days,
        month_type: MonthType::Past,
    }
}
