pub mod calendar;
pub mod date_util;
pub mod error;
pub mod metrics;
pub mod model;
pub mod storage;

pub use calendar::{MonthReference, MonthTable, WorkingDays, YearMonth};
pub use error::{Error, Result};
pub use metrics::budget::{BudgetAnalysis, BudgetStatus, HealthStatus};
pub use metrics::burn::BurnPlan;
pub use metrics::cache::{MetricsCache, MetricsQuery, NoCache, TtlCache};
pub use metrics::utilization::{UtilizationReportRow, UtilizationRow};
pub use metrics::{CombinedMetrics, MetricEntry, MonthType, PerformanceMetrics, RawPerformanceMetrics};
pub use model::{Allocation, Constraint, Employee, Project, TimeEntry};
pub use storage::repository::StoreCounts;
pub use storage::Database;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use metrics::{budget, burn, reconcile, utilization};
use storage::{repository, schema};

/// `app_config` key holding the metrics cache time-to-live in seconds. 0 disables caching.
pub const CACHE_TTL_KEY: &str = "metrics_cache_ttl_secs";

/// Main entry point: metrics over a project-accounting store.
pub struct Dashboard {
    db: Database,
    cache: Arc<dyn MetricsCache>,
    as_of: Option<NaiveDate>,
}

impl Dashboard {
    /// Dashboard with the default 60 second result cache.
    pub fn new(db: Database) -> Self {
        Self::with_cache(db, Arc::new(TtlCache::default()))
    }

    pub fn with_cache(db: Database, cache: Arc<dyn MetricsCache>) -> Self {
        Self {
            db,
            cache,
            as_of: None,
        }
    }

    /// Pin "today" for month classification and timelines.
    pub fn with_as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    /// Dashboard whose cache follows the stored `metrics_cache_ttl_secs` setting.
    pub async fn open_configured(db: Database) -> Result<Self> {
        let stored: Option<String> = db
            .reader()
            .call(|conn| repository::get_config(conn, CACHE_TTL_KEY))
            .await?;

        let cache: Arc<dyn MetricsCache> = match stored {
            None => Arc::new(TtlCache::default()),
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    Error::Config(format!("{CACHE_TTL_KEY} must be a whole number of seconds, got {raw:?}"))
                })?;
                if secs == 0 {
                    log::info!("Metrics cache disabled");
                    Arc::new(NoCache)
                } else {
                    Arc::new(TtlCache::new(Duration::from_secs(secs)))
                }
            }
        };
        Ok(Self::with_cache(db, cache))
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The pinned reference date, or the local date.
    pub fn today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(calendar::local_today)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Actuals, projected and possible for `[start, end]`, served from the cache
    /// when an identical query ran recently.
    pub async fn performance_metrics(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        constraint: Option<&Constraint>,
    ) -> Result<Arc<PerformanceMetrics>> {
        let query = MetricsQuery {
            start,
            end,
            constraint: constraint.cloned(),
        };
        if let Some(hit) = self.cache.get(&query) {
            return Ok(hit);
        }

        let computed = Arc::new(metrics::compute_performance_metrics(&self.db, start, end, constraint).await?);
        self.cache.insert(query, computed.clone());
        Ok(computed)
    }

    pub async fn month_table(&self, start: NaiveDate, end: NaiveDate) -> Result<MonthTable> {
        metrics::load_month_table(&self.db, start, end).await
    }

    /// Actuals and projected merged into one chronological view as of [`Dashboard::today`].
    pub async fn combined_metrics(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        constraint: Option<&Constraint>,
    ) -> Result<CombinedMetrics> {
        let metrics = self.performance_metrics(start, end, constraint).await?;
        let months = self.month_table(start, end).await?;
        Ok(reconcile::combine_actual_projected(
            &metrics.actuals,
            &metrics.projected,
            &months,
            Some(self.today()),
        ))
    }

    /// Per-employee utilization for `month` (default: the current month).
    pub async fn employee_utilization(&self, month: Option<YearMonth>) -> Result<Vec<UtilizationRow>> {
        let month = month.unwrap_or_else(|| YearMonth::of(self.today()));
        let (start, end) = (month.first_day(), month.last_day());
        let working_days = self.month_table(start, end).await?.expected_working_days(month);

        let (employees, allocations, entries) = self
            .db
            .reader()
            .call(move |conn| {
                let employees = repository::get_employees(conn, None)?;
                let allocations = repository::get_rate_allocations(conn, None)?;
                let entries = repository::get_time_entries(conn, start, end, None)?;
                Ok::<_, rusqlite::Error>((employees, allocations, entries))
            })
            .await?;

        Ok(utilization::calculate_employee_utilization(
            &employees,
            &allocations,
            &entries,
            working_days,
            Some(month),
            self.today(),
        ))
    }

    /// Billable utilization report for `month` with year-to-date totals.
    pub async fn utilization_report(
        &self,
        month: Option<YearMonth>,
    ) -> Result<Vec<UtilizationReportRow>> {
        let month = month.unwrap_or_else(|| YearMonth::of(self.today()));
        let (start, end) = (month.first_day(), month.last_day());
        let year_start = YearMonth::new(month.year(), 1)?.first_day();

        let month_metrics = self.performance_metrics(start, end, None).await?;
        let ytd_metrics = self.performance_metrics(year_start, end, None).await?;
        let (employees, entries) = self
            .db
            .reader()
            .call(move |conn| {
                let employees = repository::get_employees(conn, None)?;
                let entries = repository::get_time_entries(conn, start, end, None)?;
                Ok::<_, rusqlite::Error>((employees, entries))
            })
            .await?;

        Ok(utilization::utilization_report(
            &employees,
            &month_metrics,
            &ytd_metrics,
            &entries,
            month,
        ))
    }

    /// Budget health of a project over its full timeline.
    ///
    /// If aggregation fails the project's recorded `budget_used` is used instead.
    pub async fn budget_status(&self, project_id: &str) -> Result<BudgetAnalysis> {
        let project = self.get_project(project_id).await?;
        let today = self.today();

        let (Some(start), Some(end)) = (project.start_date, project.end_date) else {
            return Ok(budget::analyze_budget_status(&project, None, today));
        };
        let constraint = Constraint::Project(project.id.clone());
        match self.performance_metrics(start, end, Some(&constraint)).await {
            Ok(metrics) => Ok(budget::analyze_budget_status(&project, Some(&*metrics), today)),
            Err(e) => {
                log::error!("Error calculating budget metrics for {project_id}: {e}");
                Ok(budget::analyze_budget_status(&project, None, today))
            }
        }
    }

    /// Month-by-month hours plan for every allocation on a project.
    pub async fn burn_plan(&self, project_id: &str) -> Result<BurnPlan> {
        let project = self.get_project(project_id).await?;
        let constraint = Constraint::Project(project.id.clone());

        let allocations = self
            .db
            .reader()
            .call({
                let constraint = constraint.clone();
                move |conn| repository::get_rate_allocations(conn, Some(&constraint))
            })
            .await?;
        let today = self.today();
        let (Some(first), Some(last)) = (allocations.first(), allocations.last()) else {
            return Ok(burn::build_burn_plan(&project.id, &[], &[], &MonthTable::default(), today));
        };
        let start = YearMonth::of(first.allocation_date).first_day();
        let end = YearMonth::of(last.allocation_date).last_day();

        let entries = self
            .db
            .reader()
            .call(move |conn| repository::get_time_entries(conn, start, end, Some(&constraint)))
            .await?;
        let months = self.month_table(start, end).await?;

        Ok(burn::build_burn_plan(&project.id, &allocations, &entries, &months, today))
    }

    // ── Calendar ───────────────────────────────────────────────────

    /// Working, worked and remaining business days, honoring the month reference row.
    pub async fn working_days(&self, year: i32, month: u32) -> Result<WorkingDays> {
        let rows = self
            .db
            .reader()
            .call(move |conn| repository::get_months(conn, Some((year, year))))
            .await?;
        let reference = rows.iter().find(|r| r.month == month).map(|r| r.working_days);
        calendar::calculate_working_days(year, month, reference, self.today())
    }

    pub async fn list_months(&self, year: Option<i32>) -> Result<Vec<MonthReference>> {
        let rows = self
            .db
            .reader()
            .call(move |conn| repository::get_months(conn, year.map(|y| (y, y))))
            .await?;
        Ok(rows)
    }

    /// Store an operator edit of a month's business days. Cached metrics are dropped.
    pub async fn set_month_reference(&self, row: MonthReference) -> Result<()> {
        calendar::validate_month_reference(&row)?;
        self.db
            .writer()
            .call(move |conn| repository::upsert_month(conn, &row))
            .await?;
        self.cache.invalidate_all();
        log::info!("Updated month reference {}-{:02}", row.year, row.month);
        Ok(())
    }

    /// Create calculated month rows for `year`. Returns the number of rows created.
    pub async fn generate_year(&self, year: i32, copy_holidays: bool) -> Result<usize> {
        let created = self
            .db
            .writer()
            .call(move |conn| schema::generate_year(conn, year, copy_holidays))
            .await?;
        if created > 0 {
            self.cache.invalidate_all();
        }
        Ok(created)
    }

    // ── Projects & status ──────────────────────────────────────────

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        let id = project_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::get_project(conn, &id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {project_id}")))
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.db.reader().call(|conn| repository::list_projects(conn)).await?)
    }

    pub async fn status(&self) -> Result<StoreCounts> {
        Ok(self.db.reader().call(|conn| repository::store_counts(conn)).await?)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HOLIDAY_PROJECT_ID;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn entry(employee: &str, project: &str, d: NaiveDate, hours: f64) -> TimeEntry {
        TimeEntry {
            employee_id: employee.into(),
            project_id: project.into(),
            date: d,
            hours,
            billable: project != HOLIDAY_PROJECT_ID,
            amount: None,
            description: None,
        }
    }

    fn employee(id: &str, hire: Option<NaiveDate>) -> Employee {
        Employee {
            id: id.into(),
            name: format!("Employee {id}"),
            billable: true,
            target_allocation: Some(1.0),
            overhead_allocation: Some(0.0),
            cost_rate: Some(50.0),
            hire_date: hire,
            term_date: None,
        }
    }

    fn allocation(employee: &str, project: &str, month: u32, fte: f64) -> Allocation {
        Allocation {
            employee_id: employee.into(),
            project_id: project.into(),
            allocation_date: date(2030, month, 1),
            allocated_fte: fte,
            bill_rate: Some(100.0),
            working_days: None,
            remaining_days: None,
        }
    }

    /// March 2030 actuals for e1 (p1, p2) and e2 (p1), plus a holiday.
    async fn seeded() -> Dashboard {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                for m in 1..=12 {
                    repository::upsert_month(
                        conn,
                        &MonthReference { year: 2030, month: m, working_days: 20, holidays: 0 },
                    )?;
                }
                repository::upsert_employee(conn, &employee("e1", None))?;
                repository::upsert_employee(conn, &employee("e2", Some(date(2030, 6, 16))))?;
                repository::upsert_project(
                    conn,
                    &Project {
                        id: "p1".into(),
                        name: "Analytics platform".into(),
                        client: Some("Acme".into()),
                        status: Some("active".into()),
                        start_date: Some(date(2030, 1, 1)),
                        end_date: Some(date(2030, 12, 31)),
                        contract_value: Some(200_000.0),
                        budget_used: None,
                    },
                )?;
                repository::upsert_allocation(conn, &allocation("e1", "p1", 3, 0.5))?;
                repository::upsert_allocation(conn, &allocation("e1", "p1", 9, 0.5))?;
                for e in [
                    entry("e1", "p1", date(2030, 3, 4), 8.0),
                    entry("e1", "p2", date(2030, 3, 5), 4.0),
                    entry("e2", "p1", date(2030, 3, 5), 6.0),
                    entry("e1", HOLIDAY_PROJECT_ID, date(2030, 3, 6), 8.0),
                ] {
                    repository::insert_time_entry(conn, &e)?;
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
        Dashboard::new(db).with_as_of(date(2030, 6, 20))
    }

    #[tokio::test]
    async fn test_holiday_hours_never_in_actuals() {
        let dash = seeded().await;
        let employee = Constraint::Employee("e1".into());
        let metrics = dash
            .performance_metrics(date(2030, 3, 1), date(2030, 3, 31), Some(&employee))
            .await
            .unwrap();

        let march = &metrics.actuals[&ym(2030, 3)];
        assert!(!march.contains_key(HOLIDAY_PROJECT_ID));
        let total: f64 = march.values().map(|e| e.hours).sum();
        assert_eq!(total, 12.0);
    }

    #[tokio::test]
    async fn test_grouping_key_follows_constraint() {
        let dash = seeded().await;
        let (start, end) = (date(2030, 3, 1), date(2030, 3, 31));
        let keys = |m: &PerformanceMetrics| -> Vec<String> {
            m.actuals[&ym(2030, 3)].keys().cloned().collect()
        };

        let all = dash.performance_metrics(start, end, None).await.unwrap();
        assert_eq!(keys(&all), vec!["e1", "e2"]);

        let by_project = Constraint::Project("p1".into());
        let project = dash.performance_metrics(start, end, Some(&by_project)).await.unwrap();
        assert_eq!(keys(&project), vec!["e1", "e2"]);
        assert_eq!(project.actuals[&ym(2030, 3)]["e1"].hours, 8.0);

        let by_employee = Constraint::Employee("e1".into());
        let employee = dash.performance_metrics(start, end, Some(&by_employee)).await.unwrap();
        assert_eq!(keys(&employee), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_possible_prorated_for_mid_month_hire() {
        let dash = seeded().await;
        let metrics = dash
            .performance_metrics(date(2030, 6, 1), date(2030, 6, 30), None)
            .await
            .unwrap();
        let june = &metrics.possible[&ym(2030, 6)];
        // Hired on the 16th of a 30-day month with 20 working days
        assert!((june["e2"].hours - 80.0).abs() < 1e-9);
        assert_eq!(june["e1"].hours, 160.0);
    }

    #[tokio::test]
    async fn test_cache_reuse_and_invalidation() {
        let dash = seeded().await;
        let (start, end) = (date(2030, 3, 1), date(2030, 3, 31));

        let first = dash.performance_metrics(start, end, None).await.unwrap();
        let second = dash.performance_metrics(start, end, None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        dash.set_month_reference(MonthReference { year: 2030, month: 3, working_days: 19, holidays: 1 })
            .await
            .unwrap();
        let third = dash.performance_metrics(start, end, None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.projected[&ym(2030, 3)]["e1"].worked_days, 19);
    }

    #[tokio::test]
    async fn test_set_month_reference_validates() {
        let dash = seeded().await;
        let err = dash
            .set_month_reference(MonthReference { year: 2030, month: 2, working_days: 25, holidays: 5 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_combined_metrics_past_and_future() {
        let dash = seeded().await;
        let combined = dash
            .combined_metrics(date(2030, 3, 1), date(2030, 9, 30), Some(&Constraint::Project("p1".into())))
            .await
            .unwrap();

        let march = &combined[&ym(2030, 3)]["e1"];
        assert_eq!(march.month_type, MonthType::Past);
        assert_eq!(march.hours, 8.0);

        let september = &combined[&ym(2030, 9)]["e1"];
        assert_eq!(september.month_type, MonthType::Future);
        assert_eq!(september.hours, 80.0);
        assert_eq!(september.revenue, 8000.0);
    }

    #[tokio::test]
    async fn test_budget_status() {
        let dash = seeded().await;
        let analysis = dash.budget_status("p1").await.unwrap();
        let status = analysis.status().expect("analyzed");

        // e1 8h + e2 6h at the allocation rate (e2 has none)
        assert_eq!(status.budget_spent, 800.0);
        // March and September projections at 80h x 100
        assert_eq!(status.projected_remaining, 16_000.0);
        assert_eq!(status.target_threshold, 10.0);
        assert_eq!(status.health, HealthStatus::Critical);
        assert_eq!(status.trajectory.len(), 12);

        assert!(matches!(dash.budget_status("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_budget_status_insufficient_data() {
        let dash = seeded().await;
        dash.db()
            .writer()
            .call(|conn| {
                repository::upsert_project(
                    conn,
                    &Project {
                        id: "p9".into(),
                        name: "Unscoped".into(),
                        client: None,
                        status: None,
                        start_date: None,
                        end_date: None,
                        contract_value: Some(10_000.0),
                        budget_used: None,
                    },
                )
            })
            .await
            .unwrap();
        let analysis = dash.budget_status("p9").await.unwrap();
        assert!(matches!(analysis, BudgetAnalysis::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn test_burn_plan() {
        let dash = seeded().await;
        let plan = dash.burn_plan("p1").await.unwrap();
        assert_eq!(plan.employees.len(), 1);
        let months = &plan.employees[0].months;
        assert_eq!(months.len(), 2);
        // March is past: 8 actual hours, nothing left to project
        assert_eq!(months[0].actual_hours, 8.0);
        assert_eq!(months[0].projected_hours, 0.0);
        // September is ahead: all 20 days remain
        assert_eq!(months[1].projected_hours, 80.0);
        assert_eq!(plan.total_hours, 88.0);
    }

    #[tokio::test]
    async fn test_utilization_for_month() {
        let dash = seeded().await;
        let rows = dash.employee_utilization(Some(ym(2030, 3))).await.unwrap();
        let e1 = rows.iter().find(|r| r.employee_id == "e1").unwrap();
        assert_eq!(e1.expected_hours, 160.0);
        // Holiday entries count as worked time for utilization
        assert_eq!(e1.total_hours, 20.0);
        assert_eq!(e1.billable_hours, 12.0);

        let report = dash.utilization_report(Some(ym(2030, 3))).await.unwrap();
        // e2 is hired in June
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].billable_hours, 12.0);
        assert_eq!(report[0].possible_hours, 160.0);
        assert_eq!(report[0].ytd.possible_hours, 480.0);
    }

    #[tokio::test]
    async fn test_utilization_revenue_matches_actuals() {
        let dash = seeded().await;
        // April has no e1/p1 allocation; both views price at the earliest one
        dash.db()
            .writer()
            .call(|conn| repository::insert_time_entry(conn, &entry("e1", "p1", date(2030, 4, 2), 8.0)))
            .await
            .unwrap();

        let april = ym(2030, 4);
        let metrics = dash
            .performance_metrics(april.first_day(), april.last_day(), None)
            .await
            .unwrap();
        let actual_revenue = metrics.actuals[&april]["e1"].revenue;
        assert_eq!(actual_revenue, 800.0);

        let rows = dash.employee_utilization(Some(april)).await.unwrap();
        let e1 = rows.iter().find(|r| r.employee_id == "e1").unwrap();
        assert_eq!(e1.revenue_generated, actual_revenue);
        // Averaged over every allocation on record, not just April's
        assert_eq!(e1.avg_bill_rate, Some(100.0));
        assert_eq!(e1.allocated_fte, 1.0);
    }

    #[tokio::test]
    async fn test_working_days_uses_reference() {
        let dash = seeded().await;
        let wd = dash.working_days(2030, 6).await.unwrap();
        assert_eq!(wd.working_days, 20);
        assert!(wd.worked_days > 0 && wd.remaining_days > 0);
        assert!(matches!(dash.working_days(2030, 13).await, Err(Error::InvalidMonth(13))));
    }

    #[tokio::test]
    async fn test_open_configured_cache_ttl() {
        let db = Database::open_memory().await.unwrap();
        let dash = Dashboard::open_configured(db.clone()).await.unwrap();
        dash.config_set(CACHE_TTL_KEY, "0").await.unwrap();

        let uncached = Dashboard::open_configured(db.clone()).await.unwrap();
        let (start, end) = (date(2030, 1, 1), date(2030, 1, 31));
        let a = uncached.performance_metrics(start, end, None).await.unwrap();
        let b = uncached.performance_metrics(start, end, None).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        dash.config_set(CACHE_TTL_KEY, "soon").await.unwrap();
        assert!(matches!(Dashboard::open_configured(db).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_generate_year_and_list() {
        let dash = seeded().await;
        assert_eq!(dash.generate_year(2031, true).await.unwrap(), 12);
        assert_eq!(dash.list_months(Some(2031)).await.unwrap().len(), 12);
        assert_eq!(dash.generate_year(2031, true).await.unwrap(), 0);
    }
}
