//! Progress aggregator: the single writer of job status and counters.
//!
//! Every file-status mutation calls `recompute_job` inside the same
//! transaction, so the aggregate is recomputed from a consistent
//! snapshot of all sibling files and two concurrent completions can
//! never leave the counters behind reality.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::file_repo::{self, FileCounts};
use crate::db::job_repo::{self, JobRow};
use crate::db::DatabaseError;
use crate::types::JobStatus;

/// Derives the job status from a counter snapshot.
///
/// Pure function: the job's persisted status is always exactly this
/// value (cancelled jobs excepted, which pin their status).
pub fn derive_status(counts: &FileCounts) -> JobStatus {
    let processed = counts.processed();
    if processed == 0 {
        JobStatus::Pending
    } else if processed < counts.total {
        JobStatus::Processing
    } else if counts.failed == counts.total {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    }
}

/// Recounts a job's counters from its file rows and persists the
/// derived status plus lifecycle stamps.
///
/// Must be called on the same connection (and inside the same
/// transaction) as the file mutation that triggered it. Returns the
/// updated row, or `None` when the job does not exist.
///
/// A `cancelled` job keeps its counters fresh for audit accuracy but
/// never leaves `cancelled`, even when a late in-flight file lands.
pub fn recompute_job(
    conn: &Connection,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<JobRow>, DatabaseError> {
    let mut job = match job_repo::find_by_id(conn, job_id)? {
        Some(job) => job,
        None => return Ok(None),
    };

    let counts = file_repo::count_for_job(conn, job_id)?;
    job.processed_files = counts.processed();
    job.failed_files = counts.failed;
    job.processed_pages = counts.processed_pages;

    if job.status != JobStatus::Cancelled.as_str() {
        let derived = derive_status(&counts);

        if derived != JobStatus::Pending && job.started_at.is_none() {
            job.started_at = Some(now.to_rfc3339());
        }
        if derived.is_terminal() {
            if job.completed_at.is_none() {
                job.completed_at = Some(now.to_rfc3339());
            }
        } else {
            // Retry can pull a job back out of a terminal status.
            job.completed_at = None;
        }

        if job.status != derived.as_str() {
            log::debug!("Job {} status {} -> {}", job.id, job.status, derived);
        }
        job.status = derived.as_str().to_string();
    } else if counts.processed() == counts.total && job.completed_at.is_none() {
        // Last in-flight file of a cancelled job landed.
        job.completed_at = Some(now.to_rfc3339());
    }

    job_repo::update_aggregate(conn, &job)?;
    Ok(Some(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::file_repo::FileRow;
    use crate::db::Database;

    fn counts(total: u64, completed: u64, failed: u64, skipped: u64) -> FileCounts {
        FileCounts {
            total,
            completed,
            failed,
            skipped,
            processed_pages: 0,
        }
    }

    #[test]
    fn test_derive_pending_when_nothing_terminal() {
        assert_eq!(derive_status(&counts(3, 0, 0, 0)), JobStatus::Pending);
    }

    #[test]
    fn test_derive_processing_when_partially_terminal() {
        assert_eq!(derive_status(&counts(3, 1, 0, 0)), JobStatus::Processing);
        assert_eq!(derive_status(&counts(3, 1, 1, 0)), JobStatus::Processing);
    }

    #[test]
    fn test_derive_failed_only_when_every_file_failed() {
        assert_eq!(derive_status(&counts(2, 0, 2, 0)), JobStatus::Failed);
        assert_eq!(derive_status(&counts(2, 1, 1, 0)), JobStatus::Completed);
    }

    #[test]
    fn test_derive_completed_with_mixed_outcomes() {
        assert_eq!(derive_status(&counts(3, 2, 1, 0)), JobStatus::Completed);
        assert_eq!(derive_status(&counts(3, 1, 1, 1)), JobStatus::Completed);
        // All skipped is still "at least one file is not failed".
        assert_eq!(derive_status(&counts(2, 0, 0, 2)), JobStatus::Completed);
    }

    fn setup(conn: &Connection, total: usize) {
        let mut job = crate::db::job_repo::tests::sample_job("j1");
        job.total_files = total as u64;
        crate::db::job_repo::insert(conn, &job).unwrap();
        for i in 0..total {
            let file = FileRow {
                id: format!("f{}", i),
                job_id: "j1".to_string(),
                seq: i as i64,
                filename: format!("doc-{}.pdf", i),
                byte_size: 100,
                mime_type: None,
                estimated_pages: 1,
                actual_pages: None,
                status: "pending".to_string(),
                error_code: None,
                error_message: None,
                text_ref: None,
                processing_started_at: None,
                processing_completed_at: None,
            };
            crate::db::file_repo::insert(conn, &file).unwrap();
        }
    }

    fn set_file(conn: &Connection, id: &str, status: &str, pages: Option<u64>) {
        conn.execute(
            "UPDATE files SET status = ?2, actual_pages = ?3 WHERE id = ?1",
            rusqlite::params![id, status, pages],
        )
        .unwrap();
    }

    #[test]
    fn test_recompute_stamps_started_and_completed() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn, 2);

            set_file(conn, "f0", "completed", Some(5));
            let job = recompute_job(conn, "j1", Utc::now())?.unwrap();
            assert_eq!(job.status, "processing");
            assert!(job.started_at.is_some());
            assert!(job.completed_at.is_none());
            assert_eq!(job.processed_pages, 5);

            set_file(conn, "f1", "failed", None);
            let job = recompute_job(conn, "j1", Utc::now())?.unwrap();
            assert_eq!(job.status, "completed");
            assert_eq!(job.processed_files, 2);
            assert_eq!(job.failed_files, 1);
            assert!(job.completed_at.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_recompute_all_failed_is_failed() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn, 2);
            set_file(conn, "f0", "failed", None);
            set_file(conn, "f1", "failed", None);

            let job = recompute_job(conn, "j1", Utc::now())?.unwrap();
            assert_eq!(job.status, "failed");
            assert_eq!(job.failed_files, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_recompute_retry_reopens_job() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn, 2);
            set_file(conn, "f0", "completed", Some(3));
            set_file(conn, "f1", "failed", None);
            recompute_job(conn, "j1", Utc::now())?;

            // Retry resets the failed file.
            set_file(conn, "f1", "pending", None);
            let job = recompute_job(conn, "j1", Utc::now())?.unwrap();
            assert_eq!(job.status, "processing");
            assert_eq!(job.processed_files, 1);
            assert_eq!(job.failed_files, 0);
            assert!(job.completed_at.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_recompute_never_reverts_cancelled() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            setup(conn, 2);
            crate::db::job_repo::update_status(conn, "j1", "cancelled")?;
            set_file(conn, "f0", "skipped", None);

            // Late completion of an in-flight file is still recorded.
            set_file(conn, "f1", "completed", Some(4));
            let job = recompute_job(conn, "j1", Utc::now())?.unwrap();
            assert_eq!(job.status, "cancelled");
            assert_eq!(job.processed_files, 2);
            assert_eq!(job.processed_pages, 4);
            assert!(job.completed_at.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_recompute_missing_job_is_none() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            assert!(recompute_job(conn, "ghost", Utc::now())?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
