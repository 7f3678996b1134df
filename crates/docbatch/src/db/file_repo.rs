//! File repository: row mapping and queries for the `files` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw file row from the database.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub job_id: String,
    /// Creation order within the job. Claim tie-break and merge order.
    pub seq: i64,
    pub filename: String,
    pub byte_size: u64,
    pub mime_type: Option<String>,
    pub estimated_pages: u64,
    pub actual_pages: Option<u64>,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub text_ref: Option<String>,
    pub processing_started_at: Option<String>,
    pub processing_completed_at: Option<String>,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            seq: row.get("seq")?,
            filename: row.get("filename")?,
            byte_size: row.get("byte_size")?,
            mime_type: row.get("mime_type")?,
            estimated_pages: row.get("estimated_pages")?,
            actual_pages: row.get("actual_pages")?,
            status: row.get("status")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            text_ref: row.get("text_ref")?,
            processing_started_at: row.get("processing_started_at")?,
            processing_completed_at: row.get("processing_completed_at")?,
        })
    }
}

/// Inserts a new file row.
pub fn insert(conn: &Connection, file: &FileRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO files (id, job_id, seq, filename, byte_size, mime_type,
         estimated_pages, actual_pages, status, error_code, error_message, text_ref,
         processing_started_at, processing_completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            file.id,
            file.job_id,
            file.seq,
            file.filename,
            file.byte_size,
            file.mime_type,
            file.estimated_pages,
            file.actual_pages,
            file.status,
            file.error_code,
            file.error_message,
            file.text_ref,
            file.processing_started_at,
            file.processing_completed_at,
        ],
    )?;
    Ok(())
}

/// Overwrites all mutable fields of an existing file row.
pub fn update(conn: &Connection, file: &FileRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE files SET status=?2, actual_pages=?3, error_code=?4, error_message=?5,
         text_ref=?6, processing_started_at=?7, processing_completed_at=?8
         WHERE id=?1",
        params![
            file.id,
            file.status,
            file.actual_pages,
            file.error_code,
            file.error_message,
            file.text_ref,
            file.processing_started_at,
            file.processing_completed_at,
        ],
    )?;
    Ok(())
}

/// Finds a file by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM files WHERE id = ?1",
            params![id],
            FileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists all files of a job in creation order.
pub fn list_for_job(conn: &Connection, job_id: &str) -> Result<Vec<FileRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM files WHERE job_id = ?1 ORDER BY seq ASC")?;
    let rows = stmt
        .query_map(params![job_id], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Selects the next claimable file: lowest job priority, then oldest
/// job, then lowest seq. Cancelled jobs never yield claims.
pub fn next_pending(conn: &Connection) -> Result<Option<FileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT files.* FROM files
             JOIN jobs ON jobs.id = files.job_id
             WHERE files.status = 'pending' AND jobs.status != 'cancelled'
             ORDER BY jobs.priority ASC, jobs.created_at ASC, files.seq ASC
             LIMIT 1",
            [],
            FileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Flips all still-pending files of a job to `skipped`. Returns the
/// number of files affected. Used by cancellation.
pub fn skip_pending(conn: &Connection, job_id: &str) -> Result<u64, DatabaseError> {
    let n = conn.execute(
        "UPDATE files SET status = 'skipped' WHERE job_id = ?1 AND status = 'pending'",
        params![job_id],
    )?;
    Ok(n as u64)
}

/// Returns files claimed before `cutoff` that never reached a terminal
/// status, and resets them to `pending` for re-claiming.
pub fn release_stale(conn: &Connection, cutoff: &str) -> Result<u64, DatabaseError> {
    let n = conn.execute(
        "UPDATE files SET status = 'pending', processing_started_at = NULL
         WHERE status = 'processing' AND processing_started_at < ?1",
        params![cutoff],
    )?;
    Ok(n as u64)
}

/// Aggregate counters recounted from a job's files. Read under the
/// same transaction as the file mutation that triggered the recount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub processed_pages: u64,
}

impl FileCounts {
    pub fn processed(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }
}

/// Recounts the aggregate counters for a job from its file rows.
pub fn count_for_job(conn: &Connection, job_id: &str) -> Result<FileCounts, DatabaseError> {
    let counts = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'completed'), 0),
                COALESCE(SUM(status = 'failed'), 0),
                COALESCE(SUM(status = 'skipped'), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN actual_pages ELSE 0 END), 0)
         FROM files WHERE job_id = ?1",
        params![job_id],
        |r| {
            Ok(FileCounts {
                total: r.get(0)?,
                completed: r.get(1)?,
                failed: r.get(2)?,
                skipped: r.get(3)?,
                processed_pages: r.get(4)?,
            })
        },
    )?;
    Ok(counts)
}
