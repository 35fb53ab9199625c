//! Per-year run lock.
//!
//! A row in `score_runs` means a `create` for that year is in flight. The
//! insert is a single conditional statement, so two runs racing for the
//! same year cannot both get the lock.

use chrono::Utc;
use duckdb::Connection;

use crate::{DbError, format_timestamp};

/// Tries to take the lock for `year` under `run_id`.
///
/// Returns `false` if another run already holds it.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn try_acquire(conn: &Connection, year: i32, run_id: &str) -> Result<bool, DbError> {
    let rows = conn.execute(
        "INSERT INTO score_runs (year, run_id, started_at) VALUES (?, ?, ?)
         ON CONFLICT (year) DO NOTHING",
        duckdb::params![year, run_id, format_timestamp(&Utc::now())],
    )?;
    Ok(rows > 0)
}

/// Releases the lock for `year` if `run_id` holds it.
///
/// # Errors
///
/// Returns [`DbError`] if the delete fails.
pub fn release(conn: &Connection, year: i32, run_id: &str) -> Result<(), DbError> {
    conn.execute(
        "DELETE FROM score_runs WHERE year = ? AND run_id = ?",
        duckdb::params![year, run_id],
    )?;
    Ok(())
}

/// Removes the lock for `year` regardless of holder. Returns whether a lock
/// existed.
///
/// # Errors
///
/// Returns [`DbError`] if the delete fails.
pub fn force_release(conn: &Connection, year: i32) -> Result<bool, DbError> {
    let rows = conn.execute("DELETE FROM score_runs WHERE year = ?", [year])?;
    Ok(rows > 0)
}

/// The run currently holding `year`, as `(run_id, started_at)`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn current_run(conn: &Connection, year: i32) -> Result<Option<(String, String)>, DbError> {
    let mut stmt = conn.prepare("SELECT run_id, started_at FROM score_runs WHERE year = ?")?;
    let mut rows = stmt.query([year])?;
    Ok(match rows.next()? {
        Some(row) => Some((row.get(0)?, row.get(1)?)),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory;

    #[test]
    fn second_acquire_fails_until_released() {
        let conn = open_in_memory().unwrap();
        assert!(try_acquire(&conn, 2024, "run-a").unwrap());
        assert!(!try_acquire(&conn, 2024, "run-b").unwrap());
        assert!(try_acquire(&conn, 2023, "run-b").unwrap());

        release(&conn, 2024, "run-b").unwrap();
        assert_eq!(current_run(&conn, 2024).unwrap().unwrap().0, "run-a");

        release(&conn, 2024, "run-a").unwrap();
        assert!(try_acquire(&conn, 2024, "run-c").unwrap());
    }

    #[test]
    fn force_release_clears_stale_lock() {
        let conn = open_in_memory().unwrap();
        try_acquire(&conn, 2024, "stale").unwrap();
        assert!(force_release(&conn, 2024).unwrap());
        assert!(!force_release(&conn, 2024).unwrap());
        assert!(current_run(&conn, 2024).unwrap().is_none());
    }
}
