//! Top-level service facade wiring admission, storage, scheduling,
//! merging and tokens together. Embedders construct one `BatchService`
//! and go through it for every operation.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::ServiceConfig;
use crate::db::file_repo::FileRow;
use crate::db::job_repo::JobRow;
use crate::db::output_repo::OutputRow;
use crate::db::{self, Database};
use crate::error::Result;
use crate::extract::{ExtractionAdapter, TextExtractor};
use crate::merge::{MergeFormat, Merger};
use crate::quota::{Admission, QuotaGuard, UsageTracker};
use crate::reaper::Reaper;
use crate::scheduler::Scheduler;
use crate::storage::{BlobStore, FsBlobStore};
use crate::store::{BatchStore, FileSpec, JobSpec};
use crate::token::TokenService;
use crate::types::JobStatus;
use crate::worker::WorkerPool;

pub struct BatchService {
    config: ServiceConfig,
    store: BatchStore,
    quota: QuotaGuard<Arc<dyn UsageTracker>>,
    scheduler: Scheduler,
    merger: Merger,
    tokens: TokenService,
    blob: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    usage: Arc<dyn UsageTracker>,
    progress: JobProgressBroadcaster,
}

impl BatchService {
    /// Opens the service on filesystem storage under the configured
    /// data directory.
    pub fn open(
        config: ServiceConfig,
        extractor: Arc<dyn TextExtractor>,
        usage: Arc<dyn UsageTracker>,
    ) -> Result<Self> {
        let database = Database::open(&db::database_path(&config.data_dir))?;
        let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.blob_dir())?);
        Ok(Self::with_storage(config, database, blob, extractor, usage))
    }

    /// Wires the service onto existing database and blob storage.
    pub fn with_storage(
        config: ServiceConfig,
        database: Database,
        blob: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        usage: Arc<dyn UsageTracker>,
    ) -> Self {
        let progress = JobProgressBroadcaster::default();
        let store = BatchStore::new(database.clone(), progress.clone());
        Self {
            store,
            quota: QuotaGuard::new(usage.clone()),
            scheduler: Scheduler::new(database.clone()),
            merger: Merger::new(database.clone(), blob.clone(), config.token_ttl()),
            tokens: TokenService::new(database, blob.clone()),
            blob,
            extractor,
            usage,
            progress,
            config,
        }
    }

    /// Admits and creates a job. Admission failure means no rows were
    /// written.
    pub fn submit_job(&self, spec: &JobSpec, files: &[FileSpec]) -> Result<(JobRow, Admission)> {
        let admission = self.quota.admit(spec, files)?;
        let job = self.store.create_job(spec, files)?;
        Ok((job, admission))
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobRow> {
        self.store.get_job(job_id)
    }

    pub fn list_files(&self, job_id: &str) -> Result<Vec<FileRow>> {
        self.store.list_files(job_id)
    }

    pub fn retry_file(&self, file_id: &str) -> Result<JobRow> {
        self.store.retry_file(file_id)
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<JobRow> {
        self.store.cancel_job(job_id)
    }

    /// Deletes a job and reclaims every blob it owned, extracted texts
    /// and merged artifacts alike.
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        let text_refs: Vec<String> = self
            .store
            .list_files(job_id)?
            .into_iter()
            .filter_map(|f| f.text_ref)
            .collect();
        let output_refs = self.store.delete_job(job_id)?;

        for reference in text_refs.iter().chain(output_refs.iter()) {
            self.blob.delete(reference)?;
        }
        log::info!(
            "Deleted job {} ({} blob(s) reclaimed)",
            job_id,
            text_refs.len() + output_refs.len()
        );
        Ok(())
    }

    /// Merges a finished job into the requested format, returning the
    /// output with its download token.
    pub fn request_merge(&self, job_id: &str, format: MergeFormat) -> Result<OutputRow> {
        self.merger.merge_job(job_id, format)
    }

    /// Resolves a download token to the artifact bytes.
    pub fn download(&self, token: &str) -> Result<(OutputRow, Vec<u8>)> {
        self.tokens.download(token)
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    pub fn counts_by_status(&self) -> Result<Vec<(JobStatus, u64)>> {
        self.store.counts_by_status()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Starts the extraction worker pool sized by the config.
    pub fn start_workers(&self) -> WorkerPool {
        let adapter = Arc::new(ExtractionAdapter::new(
            self.extractor.clone(),
            self.blob.clone(),
            self.usage.clone(),
            self.store.clone(),
            self.config.max_extraction_retries,
            self.config.retry_delay(),
        ));
        WorkerPool::new(self.scheduler.clone(), adapter, self.config.worker_count)
    }

    /// Starts the background reaper for expired outputs and stale
    /// claims.
    pub fn start_reaper(&self) -> Reaper {
        Reaper::spawn(
            self.tokens.clone(),
            self.scheduler.clone(),
            self.config.reaper_interval(),
            self.config.claim_timeout(),
        )
    }
}
