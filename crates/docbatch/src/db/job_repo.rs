//! Job repository: row mapping and queries for the `jobs` table.
//!
//! All functions take `&Connection` so several repo calls can compose
//! inside one transaction held by the caller.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub priority: i64,
    pub merge_requested: bool,
    pub merge_format: Option<String>,
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub total_pages: u64,
    pub processed_pages: u64,
    pub status: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            priority: row.get("priority")?,
            merge_requested: row.get::<_, i64>("merge_requested")? != 0,
            merge_format: row.get("merge_format")?,
            total_files: row.get("total_files")?,
            processed_files: row.get("processed_files")?,
            failed_files: row.get("failed_files")?,
            total_pages: row.get("total_pages")?,
            processed_pages: row.get("processed_pages")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, owner_id, name, priority, merge_requested, merge_format,
         total_files, processed_files, failed_files, total_pages, processed_pages,
         status, created_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            job.id,
            job.owner_id,
            job.name,
            job.priority,
            job.merge_requested as i64,
            job.merge_format,
            job.total_files,
            job.processed_files,
            job.failed_files,
            job.total_pages,
            job.processed_pages,
            job.status,
            job.created_at,
            job.started_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Persists the aggregator's recomputed counters, status and stamps.
pub fn update_aggregate(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET processed_files=?2, failed_files=?3, processed_pages=?4,
         status=?5, started_at=?6, completed_at=?7 WHERE id=?1",
        params![
            job.id,
            job.processed_files,
            job.failed_files,
            job.processed_pages,
            job.status,
            job.started_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Updates only the status of a job.
pub fn update_status(conn: &Connection, id: &str, status: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status = ?2 WHERE id = ?1",
        params![id, status],
    )?;
    Ok(())
}

/// Deletes a job (files and outputs cascade).
pub fn delete(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let n = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

/// Lists jobs that still have pending files, ordered by scheduling
/// priority. Used for observability and back-pressure decisions.
pub fn list_pending(conn: &Connection, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT jobs.* FROM jobs
         JOIN files ON files.job_id = jobs.id AND files.status = 'pending'
         WHERE jobs.status != 'cancelled'
         ORDER BY jobs.priority ASC, jobs.created_at ASC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts jobs with the given status.
pub fn count_by_status(conn: &Connection, status: &str) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status = ?1",
        params![status],
        |r| r.get(0),
    )?;
    Ok(count)
}
