use chrono::Datelike;
use rusqlite::{params, Connection};

use crate::calendar::{calculated_month_reference, MonthReference};

/// Years before the current one seeded into `months` on open.
const SEED_YEARS_BACK: i32 = 2;
/// Years after the current one seeded into `months` on open.
const SEED_YEARS_AHEAD: i32 = 1;

/// Populate `months` with calculated weekday counts from two years back through
/// next year. Called on DB open; rows that already exist (including operator
/// edits) are left untouched.
pub fn ensure_month_reference(conn: &Connection) -> Result<(), rusqlite::Error> {
    let year = chrono::Local::now().date_naive().year();
    for y in (year - SEED_YEARS_BACK)..=(year + SEED_YEARS_AHEAD) {
        insert_year(conn, y, None)?;
    }
    Ok(())
}

/// Create month rows for `year` with calculated weekday counts. When
/// `copy_holidays` is set, holiday counts come from the previous year's rows.
/// Returns the number of rows inserted.
pub fn generate_year(
    conn: &Connection,
    year: i32,
    copy_holidays: bool,
) -> Result<usize, rusqlite::Error> {
    let holidays = if copy_holidays {
        Some(previous_year_holidays(conn, year)?)
    } else {
        None
    };
    insert_year(conn, year, holidays.as_ref())
}

fn insert_year(
    conn: &Connection,
    year: i32,
    holidays: Option<&[u32; 12]>,
) -> Result<usize, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO months (year, month, working_days, holidays, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))",
    )?;

    let mut inserted = 0;
    for month in 1..=12u32 {
        let mut row = calculated_row(year, month)?;
        if let Some(h) = holidays {
            row.holidays = h[(month - 1) as usize];
        }
        inserted += stmt.execute(params![row.year, row.month, row.working_days, row.holidays])?;
    }
    Ok(inserted)
}

fn calculated_row(year: i32, month: u32) -> Result<MonthReference, rusqlite::Error> {
    calculated_month_reference(year, month)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn previous_year_holidays(conn: &Connection, year: i32) -> Result<[u32; 12], rusqlite::Error> {
    let mut holidays = [0u32; 12];
    let mut stmt = conn.prepare("SELECT month, holidays FROM months WHERE year = ?1")?;
    let rows = stmt.query_map(params![year - 1], |row| {
        Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?))
    })?;
    for row in rows {
        let (month, count) = row?;
        if (1..=12).contains(&month) {
            holidays[(month - 1) as usize] = count;
        }
    }
    Ok(holidays)
}
