//! Output repository: merged artifacts and their download tokens.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw output row from the database.
#[derive(Debug, Clone)]
pub struct OutputRow {
    pub id: String,
    pub job_id: String,
    pub format: String,
    pub storage_ref: String,
    pub byte_size: u64,
    pub download_token: String,
    pub expires_at: String,
    pub download_count: u64,
    pub created_at: String,
}

impl OutputRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            format: row.get("format")?,
            storage_ref: row.get("storage_ref")?,
            byte_size: row.get("byte_size")?,
            download_token: row.get("download_token")?,
            expires_at: row.get("expires_at")?,
            download_count: row.get("download_count")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new output row.
pub fn insert(conn: &Connection, output: &OutputRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO outputs (id, job_id, format, storage_ref, byte_size,
         download_token, expires_at, download_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            output.id,
            output.job_id,
            output.format,
            output.storage_ref,
            output.byte_size,
            output.download_token,
            output.expires_at,
            output.download_count,
            output.created_at,
        ],
    )?;
    Ok(())
}

/// Finds an output by its download token.
pub fn find_by_token(conn: &Connection, token: &str) -> Result<Option<OutputRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM outputs WHERE download_token = ?1",
            params![token],
            OutputRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a non-expired output for a (job, format) pair. Re-merging
/// while such an output exists returns it instead of duplicating work.
pub fn find_active(
    conn: &Connection,
    job_id: &str,
    format: &str,
    now: &str,
) -> Result<Option<OutputRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM outputs
             WHERE job_id = ?1 AND format = ?2 AND expires_at > ?3
             ORDER BY created_at DESC LIMIT 1",
            params![job_id, format, now],
            OutputRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists all outputs whose TTL has passed.
pub fn list_expired(conn: &Connection, now: &str) -> Result<Vec<OutputRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM outputs WHERE expires_at < ?1")?;
    let rows = stmt
        .query_map(params![now], OutputRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lists all outputs of a job.
pub fn list_for_job(conn: &Connection, job_id: &str) -> Result<Vec<OutputRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM outputs WHERE job_id = ?1")?;
    let rows = stmt
        .query_map(params![job_id], OutputRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes an output row. Deleting an already-deleted row is a no-op.
pub fn delete(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let n = conn.execute("DELETE FROM outputs WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

/// Increments the download counter for a token.
pub fn increment_download_count(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE outputs SET download_count = download_count + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{job_repo, Database};

    pub(crate) fn sample_output(id: &str, job_id: &str, token: &str) -> OutputRow {
        OutputRow {
            id: id.to_string(),
            job_id: job_id.to_string(),
            format: "plain_text".to_string(),
            storage_ref: format!("blob-{}", id),
            byte_size: 2048,
            download_token: token.to_string(),
            expires_at: "2026-01-02T00:00:00+00:00".to_string(),
            download_count: 0,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn setup(conn: &Connection) {
        job_repo::insert(conn, &crate::db::job_repo::tests::sample_job("j1")).unwrap();
    }

    #[test]
    fn test_insert_and_find_by_token() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn);
            insert(conn, &sample_output("o1", "j1", "tok-1"))?;

            let found = find_by_token(conn, "tok-1")?.unwrap();
            assert_eq!(found.id, "o1");
            assert_eq!(found.download_count, 0);
            assert!(find_by_token(conn, "tok-x")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_active_respects_expiry() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn);
            insert(conn, &sample_output("o1", "j1", "tok-1"))?;

            let hit = find_active(conn, "j1", "plain_text", "2026-01-01T12:00:00+00:00")?;
            assert!(hit.is_some());

            let miss = find_active(conn, "j1", "plain_text", "2026-01-03T00:00:00+00:00")?;
            assert!(miss.is_none());

            let other_format = find_active(conn, "j1", "markdown", "2026-01-01T12:00:00+00:00")?;
            assert!(other_format.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_expired() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn);
            insert(conn, &sample_output("o1", "j1", "tok-1"))?;
            let mut later = sample_output("o2", "j1", "tok-2");
            later.expires_at = "2026-02-01T00:00:00+00:00".to_string();
            insert(conn, &later)?;

            let expired = list_expired(conn, "2026-01-15T00:00:00+00:00")?;
            assert_eq!(expired.len(), 1);
            assert_eq!(expired[0].id, "o1");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn);
            insert(conn, &sample_output("o1", "j1", "tok-1"))?;
            assert!(delete(conn, "o1")?);
            assert!(!delete(conn, "o1")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_increment_download_count() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn);
            insert(conn, &sample_output("o1", "j1", "tok-1"))?;
            increment_download_count(conn, "o1")?;
            increment_download_count(conn, "o1")?;

            let found = find_by_token(conn, "tok-1")?.unwrap();
            assert_eq!(found.download_count, 2);
            Ok(())
        })
        .unwrap();
    }
}
