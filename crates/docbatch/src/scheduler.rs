//! Scheduler: answers "what is next" for the extraction workers.
//!
//! Selection policy: lowest job priority first, then oldest job, then
//! the file's creation order within the job. Claim-and-lock is one
//! transaction under the database mutex, so no two claimers ever
//! receive the same file. The scheduler never blocks on extraction and
//! manages no worker threads itself.

use chrono::{Duration, Utc};

use crate::db::file_repo;
use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::error::Result;
use crate::types::FileStatus;

/// A claimed (job, file) pair handed to a worker.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job_id: String,
    pub file_id: String,
    pub filename: String,
    pub byte_size: u64,
    pub mime_type: Option<String>,
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
}

impl Scheduler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Claims the next admissible pending file, atomically flipping it
    /// to `processing` with a start stamp. Returns `None` when nothing
    /// is claimable.
    pub fn claim_next_file(&self) -> Result<Option<Claim>> {
        let now = Utc::now();
        let claim = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let file = match file_repo::next_pending(&tx)? {
                Some(f) => f,
                None => return Ok(None),
            };

            let mut claimed = file.clone();
            claimed.status = FileStatus::Processing.as_str().to_string();
            claimed.processing_started_at = Some(now.to_rfc3339());
            file_repo::update(&tx, &claimed)?;
            tx.commit()?;

            log::debug!("Claimed file {} of job {}", file.id, file.job_id);
            Ok(Some(Claim {
                job_id: file.job_id,
                file_id: file.id,
                filename: file.filename,
                byte_size: file.byte_size,
                mime_type: file.mime_type,
            }))
        })?;
        Ok(claim)
    }

    /// Jobs that still have pending files, in claim order. For
    /// observability and worker-pool sizing decisions by the caller.
    pub fn list_pending_jobs(&self, limit: u64) -> Result<Vec<JobRow>> {
        Ok(self.db.with_conn(|conn| job_repo::list_pending(conn, limit))?)
    }

    /// Returns files stuck in `processing` longer than `claim_timeout`
    /// to `pending` for re-claiming. Covers workers that died mid-file.
    pub fn release_stale_claims(&self, claim_timeout: Duration) -> Result<u64> {
        let cutoff = (Utc::now() - claim_timeout).to_rfc3339();
        let released = self
            .db
            .with_conn(|conn| file_repo::release_stale(conn, &cutoff))?;
        if released > 0 {
            log::warn!("Released {} stale claim(s) back to pending", released);
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobProgressBroadcaster;
    use crate::store::{BatchStore, FileSpec, JobSpec};

    fn setup() -> (BatchStore, Scheduler) {
        let db = Database::open_in_memory().unwrap();
        let store = BatchStore::new(db.clone(), JobProgressBroadcaster::default());
        let scheduler = Scheduler::new(db);
        (store, scheduler)
    }

    fn spec(priority: i64) -> JobSpec {
        JobSpec {
            owner_id: "owner-1".to_string(),
            name: "batch".to_string(),
            priority,
            merge_requested: false,
            merge_format: None,
        }
    }

    fn files(n: usize) -> Vec<FileSpec> {
        (0..n)
            .map(|i| FileSpec {
                filename: format!("doc-{}.pdf", i),
                byte_size: 1000,
                estimated_pages: Some(1),
            })
            .collect()
    }

    #[test]
    fn test_priority_job_drains_first() {
        let (store, scheduler) = setup();
        let urgent = store.create_job(&spec(1), &files(3)).unwrap();
        let casual = store.create_job(&spec(5), &files(1)).unwrap();

        for _ in 0..3 {
            let claim = scheduler.claim_next_file().unwrap().unwrap();
            assert_eq!(claim.job_id, urgent.id);
        }
        let claim = scheduler.claim_next_file().unwrap().unwrap();
        assert_eq!(claim.job_id, casual.id);
        assert!(scheduler.claim_next_file().unwrap().is_none());
    }

    #[test]
    fn test_files_claimed_in_creation_order() {
        let (store, scheduler) = setup();
        store.create_job(&spec(5), &files(3)).unwrap();

        let first = scheduler.claim_next_file().unwrap().unwrap();
        let second = scheduler.claim_next_file().unwrap().unwrap();
        assert_eq!(first.filename, "doc-0.pdf");
        assert_eq!(second.filename, "doc-1.pdf");
    }

    #[test]
    fn test_claim_stamps_processing() {
        let (store, scheduler) = setup();
        let job = store.create_job(&spec(5), &files(1)).unwrap();

        let claim = scheduler.claim_next_file().unwrap().unwrap();
        let file = store.get_file(&claim.file_id).unwrap();
        assert_eq!(file.status, "processing");
        assert!(file.processing_started_at.is_some());
        assert_eq!(file.job_id, job.id);
    }

    #[test]
    fn test_cancelled_job_yields_no_claims() {
        let (store, scheduler) = setup();
        let job = store.create_job(&spec(1), &files(2)).unwrap();
        store.cancel_job(&job.id).unwrap();

        assert!(scheduler.claim_next_file().unwrap().is_none());
    }

    #[test]
    fn test_list_pending_jobs() {
        let (store, scheduler) = setup();
        let a = store.create_job(&spec(2), &files(1)).unwrap();
        let b = store.create_job(&spec(1), &files(1)).unwrap();

        let pending = scheduler.list_pending_jobs(10).unwrap();
        let ids: Vec<&str> = pending.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);
    }

    #[test]
    fn test_release_stale_claims() {
        let (store, scheduler) = setup();
        store.create_job(&spec(5), &files(1)).unwrap();
        let claim = scheduler.claim_next_file().unwrap().unwrap();

        // Negative timeout: the fresh claim is already considered stale.
        let released = scheduler.release_stale_claims(Duration::seconds(-1)).unwrap();
        assert_eq!(released, 1);

        let reclaimed = scheduler.claim_next_file().unwrap().unwrap();
        assert_eq!(reclaimed.file_id, claim.file_id);
    }
}
