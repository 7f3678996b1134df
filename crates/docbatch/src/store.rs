//! Batch store: the canonical owner of job and file state.
//!
//! All mutations run under the database lock: the file update and the
//! aggregate recompute share one transaction, so readers never observe
//! a file transition without its job-level consequences.

use chrono::Utc;
use uuid::Uuid;

use crate::aggregate;
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::db::file_repo::{self, FileRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::error::{DocbatchError, Result};
use crate::merge::MergeFormat;
use crate::types::{FileStatus, JobStatus};

/// Submission-time description of a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub owner_id: String,
    pub name: String,
    /// Lower is more urgent; bounded 1..=10 at admission.
    pub priority: i64,
    pub merge_requested: bool,
    pub merge_format: Option<MergeFormat>,
}

/// Submission-time description of one uploaded file.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub filename: String,
    pub byte_size: u64,
    /// Pre-processing page estimate; when absent a byte-size heuristic
    /// is applied.
    pub estimated_pages: Option<u64>,
}

impl FileSpec {
    /// Rough pages-per-bytes heuristic used when the caller provides
    /// no estimate. 50 KiB per page, minimum one. Admission estimates
    /// and stored totals both go through here.
    pub(crate) fn estimate_pages(&self) -> u64 {
        self.estimated_pages
            .unwrap_or_else(|| (self.byte_size / 51_200).max(1))
    }
}

/// Terminal outcome reported for a file by the extraction choreography.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Completed { actual_pages: u64, text_ref: String },
    Failed { code: String, message: String },
    Skipped,
}

impl FileOutcome {
    fn status(&self) -> FileStatus {
        match self {
            FileOutcome::Completed { .. } => FileStatus::Completed,
            FileOutcome::Failed { .. } => FileStatus::Failed,
            FileOutcome::Skipped => FileStatus::Skipped,
        }
    }
}

/// Persistent store for jobs and their files.
///
/// Stateless with respect to job data: everything reads and writes
/// through the database, so restarting the process loses nothing
/// beyond in-flight claims.
#[derive(Clone)]
pub struct BatchStore {
    db: Database,
    progress: JobProgressBroadcaster,
}

impl BatchStore {
    pub fn new(db: Database, progress: JobProgressBroadcaster) -> Self {
        Self { db, progress }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a job and all of its file rows in one transaction.
    ///
    /// Zero-byte uploads are excluded before processing: their rows are
    /// created directly in `skipped`, and the aggregate reflects that
    /// immediately.
    pub fn create_job(&self, spec: &JobSpec, files: &[FileSpec]) -> Result<JobRow> {
        let now = Utc::now();
        let job_id = Uuid::new_v4().to_string();
        let total_pages: u64 = files.iter().map(|f| f.estimate_pages()).sum();

        let job = JobRow {
            id: job_id.clone(),
            owner_id: spec.owner_id.clone(),
            name: spec.name.clone(),
            priority: spec.priority,
            merge_requested: spec.merge_requested,
            merge_format: spec.merge_format.map(|f| f.as_str().to_string()),
            total_files: files.len() as u64,
            processed_files: 0,
            failed_files: 0,
            total_pages,
            processed_pages: 0,
            status: JobStatus::Pending.as_str().to_string(),
            created_at: now.to_rfc3339(),
            started_at: None,
            completed_at: None,
        };

        let created = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            job_repo::insert(&tx, &job)?;
            let mut any_skipped = false;
            for (seq, file) in files.iter().enumerate() {
                let status = if file.byte_size == 0 {
                    any_skipped = true;
                    FileStatus::Skipped
                } else {
                    FileStatus::Pending
                };
                let row = FileRow {
                    id: Uuid::new_v4().to_string(),
                    job_id: job_id.clone(),
                    seq: seq as i64,
                    filename: file.filename.clone(),
                    byte_size: file.byte_size,
                    mime_type: mime_guess::from_path(&file.filename)
                        .first()
                        .map(|m| m.to_string()),
                    estimated_pages: file.estimate_pages(),
                    actual_pages: None,
                    status: status.as_str().to_string(),
                    error_code: None,
                    error_message: None,
                    text_ref: None,
                    processing_started_at: None,
                    processing_completed_at: None,
                };
                file_repo::insert(&tx, &row)?;
            }
            let row = if any_skipped {
                aggregate::recompute_job(&tx, &job_id, now)?.unwrap_or_else(|| job.clone())
            } else {
                job.clone()
            };
            tx.commit()?;
            Ok(row)
        })?;

        log::info!(
            "Created job {} ({} files, ~{} pages, priority {})",
            created.id,
            created.total_files,
            created.total_pages,
            created.priority
        );
        Ok(created)
    }

    /// Returns a job by id.
    pub fn get_job(&self, job_id: &str) -> Result<JobRow> {
        self.db
            .with_conn(|conn| job_repo::find_by_id(conn, job_id))?
            .ok_or_else(|| DocbatchError::JobNotFound(job_id.to_string()))
    }

    /// Lists a job's files in creation order.
    pub fn list_files(&self, job_id: &str) -> Result<Vec<FileRow>> {
        let files = self
            .db
            .with_conn(|conn| file_repo::list_for_job(conn, job_id))?;
        if files.is_empty() {
            // Distinguish an unknown job from a (rejected) empty one.
            self.get_job(job_id)?;
        }
        Ok(files)
    }

    /// Returns a file by id.
    pub fn get_file(&self, file_id: &str) -> Result<FileRow> {
        self.db
            .with_conn(|conn| file_repo::find_by_id(conn, file_id))?
            .ok_or_else(|| DocbatchError::FileNotFound(file_id.to_string()))
    }

    /// Applies a terminal outcome to a file and recomputes the job
    /// aggregate in the same transaction. The returned flag reports
    /// whether the outcome was applied, so callers tie side effects
    /// (usage debits, notifications) to the first delivery only.
    ///
    /// Idempotent under duplicate delivery: re-applying an outcome to a
    /// file already in that terminal status is a no-op; a conflicting
    /// terminal outcome is ignored with a warning (first writer wins).
    pub fn update_file_status(&self, file_id: &str, outcome: FileOutcome) -> Result<(JobRow, bool)> {
        let now = Utc::now();
        let file_id = file_id.to_string();
        let updated = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut file = match file_repo::find_by_id(&tx, &file_id)? {
                Some(f) => f,
                None => return Ok(None),
            };

            let current = FileStatus::parse(&file.status);
            if let Some(current) = current {
                if current.is_terminal() {
                    if current != outcome.status() {
                        log::warn!(
                            "Ignoring conflicting terminal outcome {} for file {} (already {})",
                            outcome.status(),
                            file.id,
                            current
                        );
                    }
                    let job = job_repo::find_by_id(&tx, &file.job_id)?;
                    tx.commit()?;
                    return Ok(job.map(|j| (j, false)));
                }
            }

            match &outcome {
                FileOutcome::Completed {
                    actual_pages,
                    text_ref,
                } => {
                    file.status = FileStatus::Completed.as_str().to_string();
                    file.actual_pages = Some(*actual_pages);
                    file.text_ref = Some(text_ref.clone());
                    file.error_code = None;
                    file.error_message = None;
                    file.processing_completed_at = Some(now.to_rfc3339());
                }
                FileOutcome::Failed { code, message } => {
                    file.status = FileStatus::Failed.as_str().to_string();
                    file.error_code = Some(code.clone());
                    file.error_message = Some(message.clone());
                    file.processing_completed_at = Some(now.to_rfc3339());
                }
                FileOutcome::Skipped => {
                    file.status = FileStatus::Skipped.as_str().to_string();
                }
            }
            file_repo::update(&tx, &file)?;

            let job = aggregate::recompute_job(&tx, &file.job_id, now)?;
            tx.commit()?;
            Ok(job.map(|j| (j, true)))
        })?;

        match updated {
            Some((job, applied)) => {
                if applied {
                    self.progress.send(JobProgressEvent::from_job(&job));
                }
                Ok((job, applied))
            }
            None => Err(DocbatchError::FileNotFound(file_id)),
        }
    }

    /// Resets a failed file to `pending` and clears its error fields;
    /// the job aggregate follows in the same transaction.
    pub fn retry_file(&self, file_id: &str) -> Result<JobRow> {
        let now = Utc::now();
        let file_id = file_id.to_string();
        let result = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let file = match file_repo::find_by_id(&tx, &file_id)? {
                Some(f) => f,
                None => return Ok(RetryResult::NotFound),
            };
            if file.status != FileStatus::Failed.as_str() {
                return Ok(RetryResult::NotFailed(file.status));
            }

            let mut file = file;
            file.status = FileStatus::Pending.as_str().to_string();
            file.error_code = None;
            file.error_message = None;
            file.actual_pages = None;
            file.text_ref = None;
            file.processing_started_at = None;
            file.processing_completed_at = None;
            file_repo::update(&tx, &file)?;

            let job = aggregate::recompute_job(&tx, &file.job_id, now)?;
            tx.commit()?;
            Ok(match job {
                Some(job) => RetryResult::Done(job),
                None => RetryResult::NotFound,
            })
        })?;

        match result {
            RetryResult::Done(job) => {
                log::info!("File {} reset for retry (job {})", file_id, job.id);
                self.progress.send(JobProgressEvent::from_job(&job));
                Ok(job)
            }
            RetryResult::NotFailed(status) => Err(DocbatchError::InvalidTransition {
                file: file_id,
                reason: format!("retry requires a failed file, found '{}'", status),
            }),
            RetryResult::NotFound => Err(DocbatchError::FileNotFound(file_id)),
        }
    }

    /// Cancels a job: stops future claims and skips still-pending
    /// files. In-flight files finish and are recorded afterwards, but
    /// the job never leaves `cancelled`.
    pub fn cancel_job(&self, job_id: &str) -> Result<JobRow> {
        let now = Utc::now();
        let job_id = job_id.to_string();
        let cancelled = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let job = match job_repo::find_by_id(&tx, &job_id)? {
                Some(j) => j,
                None => return Ok(None),
            };
            let status = JobStatus::parse(&job.status);
            if matches!(status, Some(s) if s.is_terminal()) {
                // Cancelling a finished (or already cancelled) job is a no-op.
                tx.commit()?;
                return Ok(Some((job, false)));
            }

            job_repo::update_status(&tx, &job_id, JobStatus::Cancelled.as_str())?;
            let skipped = file_repo::skip_pending(&tx, &job_id)?;
            let job = aggregate::recompute_job(&tx, &job_id, now)?;
            tx.commit()?;
            log::info!("Cancelled job {} ({} pending file(s) skipped)", job_id, skipped);
            Ok(job.map(|j| (j, true)))
        })?;

        match cancelled {
            Some((job, changed)) => {
                if changed {
                    self.progress.send(JobProgressEvent::from_job(&job));
                }
                Ok(job)
            }
            None => Err(DocbatchError::JobNotFound(job_id)),
        }
    }

    /// Deletes a job with its files and outputs. Returns the storage
    /// references of the deleted outputs so the caller can reclaim the
    /// backing blobs.
    pub fn delete_job(&self, job_id: &str) -> Result<Vec<String>> {
        let job_id = job_id.to_string();
        let refs = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let outputs = crate::db::output_repo::list_for_job(&tx, &job_id)?;
            if !job_repo::delete(&tx, &job_id)? {
                return Ok(None);
            }
            tx.commit()?;
            Ok(Some(
                outputs.into_iter().map(|o| o.storage_ref).collect::<Vec<_>>(),
            ))
        })?;
        refs.ok_or(DocbatchError::JobNotFound(job_id))
    }

    /// Job counts per status, for observability.
    pub fn counts_by_status(&self) -> Result<Vec<(JobStatus, u64)>> {
        let statuses = [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ];
        let counts = self.db.with_conn(|conn| {
            let mut out = Vec::with_capacity(statuses.len());
            for status in statuses {
                out.push((status, job_repo::count_by_status(conn, status.as_str())?));
            }
            Ok(out)
        })?;
        Ok(counts)
    }
}

enum RetryResult {
    Done(JobRow),
    NotFailed(String),
    NotFound,
}
