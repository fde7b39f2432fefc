use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::calendar::{month_start, MonthReference};
use crate::model::{Allocation, Constraint, Employee, Project, TimeEntry};

// ── Time entries ───────────────────────────────────────────────────

/// Time entries dated within `[start, end]`, optionally scoped to one project or employee.
pub fn get_time_entries(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    constraint: Option<&Constraint>,
) -> Result<Vec<TimeEntry>, rusqlite::Error> {
    let (filter, bind) = constraint_filter(constraint, "t", 3);
    let sql = format!(
        "SELECT t.employee_id, t.project_id, t.date, t.hours, t.billable,
                t.amount, t.description
         FROM time_entries t
         WHERE substr(t.date, 1, 10) >= ?1 AND substr(t.date, 1, 10) <= ?2{filter}
         ORDER BY t.date, t.id"
    );
    let mut binds = vec![date_key(start), date_key(end)];
    binds.extend(bind);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds.iter()), time_entry_from_row)?;
    rows.collect()
}

pub fn insert_time_entry(conn: &Connection, entry: &TimeEntry) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO time_entries (
            employee_id, project_id, date, hours, billable, amount,
            description, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))",
        params![
            entry.employee_id,
            entry.project_id,
            date_key(entry.date),
            entry.hours,
            entry.billable as i32,
            entry.amount,
            entry.description,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn time_entry_from_row(row: &Row<'_>) -> Result<TimeEntry, rusqlite::Error> {
    Ok(TimeEntry {
        employee_id: row.get(0)?,
        project_id: row.get(1)?,
        date: date_col(row, 2)?,
        hours: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        billable: row.get::<_, i64>(4)? == 1,
        amount: row.get(5)?,
        description: row.get(6)?,
    })
}

// ── Allocations ────────────────────────────────────────────────────

/// Allocations whose month falls within `[start, end]`, optionally scoped.
///
/// `allocation_date` is first-of-month, so the lower bound is the first of
/// `start`'s month.
pub fn get_allocations(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    constraint: Option<&Constraint>,
) -> Result<Vec<Allocation>, rusqlite::Error> {
    let (filter, bind) = constraint_filter(constraint, "a", 3);
    let sql = format!(
        "SELECT a.employee_id, a.project_id, a.allocation_date, a.allocated_fte,
                a.bill_rate, a.working_days, a.remaining_days
         FROM allocations a
         WHERE a.allocation_date >= ?1 AND a.allocation_date <= ?2{filter}
         ORDER BY a.allocation_date, a.employee_id, a.project_id"
    );
    let mut binds = vec![date_key(month_start(start)), date_key(end)];
    binds.extend(bind);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds.iter()), allocation_from_row)?;
    rows.collect()
}

/// Every allocation in scope regardless of date; the source of bill-rate
/// fallbacks for time entries.
pub fn get_rate_allocations(
    conn: &Connection,
    constraint: Option<&Constraint>,
) -> Result<Vec<Allocation>, rusqlite::Error> {
    let (filter, bind) = constraint_filter(constraint, "a", 1);
    let sql = format!(
        "SELECT a.employee_id, a.project_id, a.allocation_date, a.allocated_fte,
                a.bill_rate, a.working_days, a.remaining_days
         FROM allocations a
         WHERE 1 = 1{filter}
         ORDER BY a.allocation_date, a.employee_id, a.project_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bind.iter()), allocation_from_row)?;
    rows.collect()
}

/// Insert or replace the allocation for its (employee, project, month).
pub fn upsert_allocation(conn: &Connection, allocation: &Allocation) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO allocations (
            employee_id, project_id, allocation_date, allocated_fte, bill_rate,
            working_days, remaining_days, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
        ON CONFLICT(employee_id, project_id, allocation_date) DO UPDATE SET
            allocated_fte=excluded.allocated_fte, bill_rate=excluded.bill_rate,
            working_days=excluded.working_days, remaining_days=excluded.remaining_days,
            updated_at=excluded.updated_at",
        params![
            allocation.employee_id,
            allocation.project_id,
            date_key(month_start(allocation.allocation_date)),
            allocation.allocated_fte,
            allocation.bill_rate,
            allocation.working_days,
            allocation.remaining_days,
        ],
    )?;
    Ok(())
}

fn allocation_from_row(row: &Row<'_>) -> Result<Allocation, rusqlite::Error> {
    Ok(Allocation {
        employee_id: row.get(0)?,
        project_id: row.get(1)?,
        allocation_date: date_col(row, 2)?,
        allocated_fte: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        bill_rate: row.get(4)?,
        working_days: row.get(5)?,
        remaining_days: row.get(6)?,
    })
}

// ── Employees ──────────────────────────────────────────────────────

/// Employees, narrowed to one when the constraint names an employee.
/// A project constraint does not narrow the employee set.
pub fn get_employees(
    conn: &Connection,
    constraint: Option<&Constraint>,
) -> Result<Vec<Employee>, rusqlite::Error> {
    let employee_id = constraint.and_then(|c| c.employee_id());
    let (sql, binds): (&str, Vec<&str>) = match employee_id {
        Some(id) => (
            "SELECT id, name, billable, target_allocation, overhead_allocation,
                    cost_rate, hire_date, term_date
             FROM employees WHERE id = ?1 ORDER BY id",
            vec![id],
        ),
        None => (
            "SELECT id, name, billable, target_allocation, overhead_allocation,
                    cost_rate, hire_date, term_date
             FROM employees ORDER BY id",
            vec![],
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(binds.iter()), |row| {
        Ok(Employee {
            id: row.get(0)?,
            name: row.get(1)?,
            billable: row.get::<_, i64>(2)? == 1,
            target_allocation: row.get(3)?,
            overhead_allocation: row.get(4)?,
            cost_rate: row.get(5)?,
            hire_date: opt_date_col(row, 6)?,
            term_date: opt_date_col(row, 7)?,
        })
    })?;
    rows.collect()
}

pub fn upsert_employee(conn: &Connection, employee: &Employee) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO employees (
            id, name, billable, target_allocation, overhead_allocation, cost_rate,
            hire_date, term_date, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
        ON CONFLICT(id) DO UPDATE SET
            name=excluded.name, billable=excluded.billable,
            target_allocation=excluded.target_allocation,
            overhead_allocation=excluded.overhead_allocation,
            cost_rate=excluded.cost_rate, hire_date=excluded.hire_date,
            term_date=excluded.term_date, updated_at=excluded.updated_at",
        params![
            employee.id,
            employee.name,
            employee.billable as i32,
            employee.target_allocation,
            employee.overhead_allocation,
            employee.cost_rate,
            employee.hire_date.map(date_key),
            employee.term_date.map(date_key),
        ],
    )?;
    Ok(())
}

// ── Months ─────────────────────────────────────────────────────────

/// Month reference rows, optionally limited to an inclusive year range.
pub fn get_months(
    conn: &Connection,
    year_range: Option<(i32, i32)>,
) -> Result<Vec<MonthReference>, rusqlite::Error> {
    let (from, to) = year_range.unwrap_or((i32::MIN, i32::MAX));
    let mut stmt = conn.prepare(
        "SELECT year, month, working_days, holidays FROM months
         WHERE year >= ?1 AND year <= ?2 ORDER BY year, month",
    )?;
    let rows = stmt.query_map(params![from, to], |row| {
        Ok(MonthReference {
            year: row.get(0)?,
            month: row.get(1)?,
            working_days: row.get(2)?,
            holidays: row.get::<_, Option<u32>>(3)?.unwrap_or(0),
        })
    })?;
    rows.collect()
}

pub fn upsert_month(conn: &Connection, month: &MonthReference) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO months (year, month, working_days, holidays, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(year, month) DO UPDATE SET
            working_days=excluded.working_days, holidays=excluded.holidays,
            updated_at=excluded.updated_at",
        params![month.year, month.month, month.working_days, month.holidays],
    )?;
    Ok(())
}

// ── Projects ───────────────────────────────────────────────────────

const PROJECT_COLUMNS: &str =
    "id, name, client, status, start_date, end_date, contract_value, budget_used";

pub fn get_project(conn: &Connection, id: &str) -> Result<Option<Project>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
        params![id],
        project_from_row,
    )
    .optional()
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id"))?;
    let rows = stmt.query_map([], project_from_row)?;
    rows.collect()
}

pub fn upsert_project(conn: &Connection, project: &Project) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO projects (
            id, name, client, status, start_date, end_date, contract_value,
            budget_used, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
        ON CONFLICT(id) DO UPDATE SET
            name=excluded.name, client=excluded.client, status=excluded.status,
            start_date=excluded.start_date, end_date=excluded.end_date,
            contract_value=excluded.contract_value, budget_used=excluded.budget_used,
            updated_at=excluded.updated_at",
        params![
            project.id,
            project.name,
            project.client,
            project.status,
            project.start_date.map(date_key),
            project.end_date.map(date_key),
            project.contract_value,
            project.budget_used,
        ],
    )?;
    Ok(())
}

fn project_from_row(row: &Row<'_>) -> Result<Project, rusqlite::Error> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        client: row.get(2)?,
        status: row.get(3)?,
        start_date: opt_date_col(row, 4)?,
        end_date: opt_date_col(row, 5)?,
        contract_value: row.get(6)?,
        budget_used: row.get(7)?,
    })
}

// ── Status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StoreCounts {
    pub projects: i64,
    pub employees: i64,
    pub allocations: i64,
    pub time_entries: i64,
    pub months: i64,
}

pub fn store_counts(conn: &Connection) -> Result<StoreCounts, rusqlite::Error> {
    let count = |table: &str| -> Result<i64, rusqlite::Error> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
    };
    Ok(StoreCounts {
        projects: count("projects")?,
        employees: count("employees")?,
        allocations: count("allocations")?,
        time_entries: count("time_entries")?,
        months: count("months")?,
    })
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Helpers ────────────────────────────────────────────────────────

/// SQL fragment and bind value scoping a query to the constraint's column.
/// `param` is the positional index the bind value takes.
fn constraint_filter(
    constraint: Option<&Constraint>,
    alias: &str,
    param: usize,
) -> (String, Option<String>) {
    match constraint {
        Some(Constraint::Project(id)) => (
            format!(" AND {alias}.project_id = ?{param}"),
            Some(id.clone()),
        ),
        Some(Constraint::Employee(id)) => (
            format!(" AND {alias}.employee_id = ?{param}"),
            Some(id.clone()),
        ),
        None => (String::new(), None),
    }
}

fn date_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Parse a stored date, accepting a trailing time component.
fn parse_stored_date(idx: usize, s: &str) -> Result<NaiveDate, rusqlite::Error> {
    let key = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_col(row: &Row<'_>, idx: usize) -> Result<NaiveDate, rusqlite::Error> {
    let s: String = row.get(idx)?;
    parse_stored_date(idx, &s)
}

fn opt_date_col(row: &Row<'_>, idx: usize) -> Result<Option<NaiveDate>, rusqlite::Error> {
    let s: Option<String> = row.get(idx)?;
    s.filter(|s| !s.trim().is_empty())
        .map(|s| parse_stored_date(idx, &s))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(employee: &str, project: &str, d: NaiveDate, hours: f64) -> TimeEntry {
        TimeEntry {
            employee_id: employee.into(),
            project_id: project.into(),
            date: d,
            hours,
            billable: true,
            amount: None,
            description: None,
        }
    }

    fn allocation(employee: &str, project: &str, d: NaiveDate, fte: f64) -> Allocation {
        Allocation {
            employee_id: employee.into(),
            project_id: project.into(),
            allocation_date: d,
            allocated_fte: fte,
            bill_rate: Some(150.0),
            working_days: None,
            remaining_days: None,
        }
    }

    #[tokio::test]
    async fn test_time_entries_filtered_by_range_and_constraint() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                insert_time_entry(conn, &entry("e1", "p1", date(2025, 3, 3), 8.0))?;
                insert_time_entry(conn, &entry("e1", "p2", date(2025, 3, 4), 4.0))?;
                insert_time_entry(conn, &entry("e2", "p1", date(2025, 3, 31), 6.0))?;
                insert_time_entry(conn, &entry("e2", "p1", date(2025, 4, 1), 2.0))?;

                let march = get_time_entries(conn, date(2025, 3, 1), date(2025, 3, 31), None)?;
                assert_eq!(march.len(), 3);

                let p1 = Constraint::Project("p1".into());
                let scoped =
                    get_time_entries(conn, date(2025, 3, 1), date(2025, 4, 30), Some(&p1))?;
                assert_eq!(scoped.len(), 3);
                assert!(scoped.iter().all(|e| e.project_id == "p1"));

                let e1 = Constraint::Employee("e1".into());
                let scoped =
                    get_time_entries(conn, date(2025, 3, 1), date(2025, 4, 30), Some(&e1))?;
                assert_eq!(scoped.len(), 2);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_time_entries_with_time_of_day_stay_in_range() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO time_entries (employee_id, project_id, date, hours, billable)
                     VALUES ('e1', 'p1', '2025-03-31 09:00', 3.0, 1),
                            ('e1', 'p1', '2025-04-01 00:00', 5.0, 1)",
                    [],
                )?;

                let march = get_time_entries(conn, date(2025, 3, 1), date(2025, 3, 31), None)?;
                assert_eq!(march.len(), 1);
                assert_eq!(march[0].date, date(2025, 3, 31));
                assert_eq!(march[0].hours, 3.0);

                let last_day = get_time_entries(conn, date(2025, 3, 31), date(2025, 3, 31), None)?;
                assert_eq!(last_day.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_allocation_upsert_and_month_bounds() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_allocation(conn, &allocation("e1", "p1", date(2025, 3, 1), 0.5))?;
                upsert_allocation(conn, &allocation("e1", "p1", date(2025, 3, 1), 0.75))?;
                upsert_allocation(conn, &allocation("e1", "p1", date(2025, 4, 1), 1.0))?;

                // Mid-month start still picks up that month's allocation
                let rows = get_allocations(conn, date(2025, 3, 15), date(2025, 3, 31), None)?;
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].allocated_fte, 0.75);

                let all = get_rate_allocations(conn, Some(&Constraint::Project("p1".into())))?;
                assert_eq!(all.len(), 2);
                let none = get_rate_allocations(conn, Some(&Constraint::Project("p9".into())))?;
                assert!(none.is_empty());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_employees_and_projects() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                for id in ["e1", "e2"] {
                    upsert_employee(
                        conn,
                        &Employee {
                            id: id.into(),
                            name: format!("Employee {id}"),
                            billable: true,
                            target_allocation: Some(0.9),
                            overhead_allocation: None,
                            cost_rate: Some(60.0),
                            hire_date: Some(date(2024, 1, 8)),
                            term_date: None,
                        },
                    )?;
                }
                assert_eq!(get_employees(conn, None)?.len(), 2);
                let one = get_employees(conn, Some(&Constraint::Employee("e2".into())))?;
                assert_eq!(one.len(), 1);
                assert_eq!(one[0].hire_date, Some(date(2024, 1, 8)));
                // A project constraint does not narrow employees
                assert_eq!(get_employees(conn, Some(&Constraint::Project("p1".into())))?.len(), 2);

                upsert_project(
                    conn,
                    &Project {
                        id: "p1".into(),
                        name: "Pipeline".into(),
                        client: Some("Acme".into()),
                        status: Some("active".into()),
                        start_date: Some(date(2025, 1, 1)),
                        end_date: Some(date(2025, 12, 31)),
                        contract_value: Some(250_000.0),
                        budget_used: None,
                    },
                )?;
                let project = get_project(conn, "p1")?.expect("project stored");
                assert_eq!(project.end_date, Some(date(2025, 12, 31)));
                assert!(get_project(conn, "missing")?.is_none());
                assert_eq!(list_projects(conn)?.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_months_upsert_and_year_range() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_month(
                    conn,
                    &MonthReference { year: 2035, month: 7, working_days: 20, holidays: 2 },
                )?;
                let rows = get_months(conn, Some((2035, 2035)))?;
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].working_days, 20);
                assert_eq!(rows[0].holidays, 2);

                let counts = store_counts(conn)?;
                assert_eq!(counts.months, get_months(conn, None)?.len() as i64);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert!(get_config(conn, "metrics_cache_ttl_secs")?.is_none());
                set_config(conn, "metrics_cache_ttl_secs", "120")?;
                set_config(conn, "metrics_cache_ttl_secs", "90")?;
                assert_eq!(get_config(conn, "metrics_cache_ttl_secs")?.as_deref(), Some("90"));
                assert_eq!(list_config(conn)?.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
