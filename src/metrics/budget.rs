use chrono::NaiveDate;
use serde::Serialize;

use super::types::{total_revenue, PerformanceMetrics};
use crate::calendar::{classify_month, MonthPhase, YearMonth};
use crate::date_util::safe_ratio;
use crate::model::Project;

/// Contract value from which a project counts as large.
pub const LARGE_PROJECT_VALUE: f64 = 1_000_000.0;
/// Contract value from which a project counts as medium-large.
pub const MEDIUM_PROJECT_VALUE: f64 = 500_000.0;
/// Target for the optimal scenario, percent of budget.
pub const OPTIMAL_TARGET_PCT: f64 = 98.5;

/// Tolerance band, in percent, for a contract of the given value.
/// Larger contracts get a tighter band.
pub fn target_threshold(contract_value: f64) -> f64 {
    if contract_value >= LARGE_PROJECT_VALUE {
        5.0
    } else if contract_value >= MEDIUM_PROJECT_VALUE {
        7.5
    } else {
        10.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Classify a projected final budget percentage.
///
/// Healthy is `[90 - t, 100 + t]`, warning `[80 - t, 100 + 1.5t]`. The bands are
/// deliberately asymmetric.
pub fn classify_health(projected_final_pct: f64, threshold: f64) -> HealthStatus {
    if (90.0 - threshold..=100.0 + threshold).contains(&projected_final_pct) {
        HealthStatus::Healthy
    } else if (80.0 - threshold..=100.0 + threshold * 1.5).contains(&projected_final_pct) {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}

/// One month of the cumulative spend series.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryPoint {
    pub month: YearMonth,
    pub phase: MonthPhase,
    pub actual_cost: f64,
    pub projected_cost: f64,
    pub cumulative_actual: f64,
    /// Cumulative actual plus this month's projection.
    pub cumulative_projected: f64,
    pub cumulative_pct_actual: f64,
    pub cumulative_pct_projected: f64,
}

/// Cumulative actual and projected spend per month from `start` through `end`.
pub fn budget_trajectory(
    metrics: &PerformanceMetrics,
    contract_value: f64,
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Vec<TrajectoryPoint> {
    let mut cumulative_actual = 0.0;
    YearMonth::range_inclusive(YearMonth::of(start), YearMonth::of(end))
        .into_iter()
        .map(|month| {
            let actual_cost: f64 = metrics
                .actuals
                .get(&month)
                .map(|b| b.values().map(|e| e.revenue).sum())
                .unwrap_or(0.0);
            let projected_cost: f64 = metrics
                .projected
                .get(&month)
                .map(|b| b.values().map(|e| e.revenue).sum())
                .unwrap_or(0.0);
            cumulative_actual += actual_cost;
            let cumulative_projected = cumulative_actual + projected_cost;

            TrajectoryPoint {
                month,
                phase: classify_month(month, today),
                actual_cost,
                projected_cost,
                cumulative_actual,
                cumulative_projected,
                cumulative_pct_actual: safe_ratio(cumulative_actual, contract_value) * 100.0,
                cumulative_pct_projected: safe_ratio(cumulative_projected, contract_value) * 100.0,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    CurrentPlan,
    /// Bottom of the tolerance band.
    Conservative,
    Optimal,
    /// Top of the tolerance band.
    Aggressive,
}

#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub kind: ScenarioKind,
    pub final_pct: f64,
}

pub fn budget_scenarios(projected_final_pct: f64, threshold: f64) -> Vec<Scenario> {
    vec![
        Scenario { kind: ScenarioKind::CurrentPlan, final_pct: projected_final_pct },
        Scenario { kind: ScenarioKind::Conservative, final_pct: 100.0 - threshold },
        Scenario { kind: ScenarioKind::Optimal, final_pct: OPTIMAL_TARGET_PCT },
        Scenario { kind: ScenarioKind::Aggressive, final_pct: 100.0 + threshold },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    OnTrack,
    /// Projected to finish below the band, leaving `unspent` of the contract.
    UnderBurn { unspent: f64 },
    /// Projected to finish above the band by `overrun`.
    OverBurn { overrun: f64 },
}

pub fn recommend(
    health: HealthStatus,
    projected_final_pct: f64,
    threshold: f64,
    contract_value: f64,
) -> Recommendation {
    if health == HealthStatus::Healthy {
        Recommendation::OnTrack
    } else if projected_final_pct < 100.0 - threshold {
        Recommendation::UnderBurn {
            unspent: contract_value * (100.0 - projected_final_pct) / 100.0,
        }
    } else if projected_final_pct > 100.0 + threshold {
        Recommendation::OverBurn {
            overrun: contract_value * (projected_final_pct - 100.0) / 100.0,
        }
    } else {
        Recommendation::OnTrack
    }
}

/// Full budget picture for one project.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub project_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub as_of: NaiveDate,
    pub budget_total: f64,
    pub budget_spent: f64,
    pub projected_remaining: f64,
    pub budget_projected: f64,
    pub timeline_elapsed_pct: f64,
    pub budget_utilized_pct: f64,
    pub projected_final_pct: f64,
    pub target_threshold: f64,
    pub health: HealthStatus,
    pub trajectory: Vec<TrajectoryPoint>,
    pub scenarios: Vec<Scenario>,
    pub recommendation: Recommendation,
    /// Dollar width of the band, reported for large contracts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_project_variance: Option<f64>,
    /// Spend came from the project's recorded `budget_used`, not time entries.
    pub from_recorded_spend: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BudgetAnalysis {
    InsufficientData { project_id: String, reason: String },
    Analyzed(Box<BudgetStatus>),
}

impl BudgetAnalysis {
    pub fn status(&self) -> Option<&BudgetStatus> {
        match self {
            BudgetAnalysis::Analyzed(s) => Some(s),
            BudgetAnalysis::InsufficientData { .. } => None,
        }
    }
}

/// Analyze a project's budget from its aggregated metrics.
///
/// `metrics` must be constrained to the project over its start..end span.
/// When `None`, the project's recorded `budget_used` stands in for both spent
/// and projected.
pub fn analyze_budget_status(
    project: &Project,
    metrics: Option<&PerformanceMetrics>,
    today: NaiveDate,
) -> BudgetAnalysis {
    let insufficient = |reason: &str| BudgetAnalysis::InsufficientData {
        project_id: project.id.clone(),
        reason: reason.to_string(),
    };
    let (Some(start), Some(end)) = (project.start_date, project.end_date) else {
        return insufficient("project has no start and end date");
    };
    let budget_total = match project.contract_value {
        Some(v) if v != 0.0 => v,
        _ => return insufficient("project has no contract value"),
    };

    let total_days = (end - start).num_days();
    let elapsed_days = if today >= start { (today - start).num_days() } else { 0 };
    let timeline_elapsed_pct =
        (safe_ratio(elapsed_days as f64, total_days as f64) * 100.0).clamp(0.0, 100.0);

    let empty = PerformanceMetrics::default();
    let (budget_spent, projected_remaining, series) = match metrics {
        Some(m) => (total_revenue(&m.actuals), total_revenue(&m.projected), m),
        None => (project.budget_used.unwrap_or(0.0), 0.0, &empty),
    };
    let budget_projected = budget_spent + projected_remaining;

    let budget_utilized_pct = safe_ratio(budget_spent, budget_total) * 100.0;
    let projected_final_pct = safe_ratio(budget_projected, budget_total) * 100.0;
    let target_threshold = target_threshold(budget_total);
    let health = classify_health(projected_final_pct, target_threshold);

    BudgetAnalysis::Analyzed(Box::new(BudgetStatus {
        project_id: project.id.clone(),
        start_date: start,
        end_date: end,
        as_of: today,
        budget_total,
        budget_spent,
        projected_remaining,
        budget_projected,
        timeline_elapsed_pct,
        budget_utilized_pct,
        projected_final_pct,
        target_threshold,
        health,
        trajectory: budget_trajectory(series, budget_total, start, end, today),
        scenarios: budget_scenarios(projected_final_pct, target_threshold),
        recommendation: recommend(health, projected_final_pct, target_threshold, budget_total),
        large_project_variance: (budget_total >= LARGE_PROJECT_VALUE)
            .then(|| budget_total * target_threshold / 100.0),
        from_recorded_spend: metrics.is_none(),
    }))
}
