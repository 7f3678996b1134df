//! Extraction worker adapter: call-and-record-result choreography
//! around the external text-extraction service.
//!
//! Extraction itself is a black box behind `TextExtractor`. The
//! adapter owns the retry policy (transient errors retried up to a
//! bound, permanent errors fail immediately), stores the extracted
//! text, records the terminal outcome, and debits actually processed
//! pages through the usage collaborator.

use std::sync::Arc;
use std::time::Duration;

use crate::db::job_repo::JobRow;
use crate::error::{ExtractionError, Result};
use crate::quota::UsageTracker;
use crate::scheduler::Claim;
use crate::storage::BlobStore;
use crate::store::{BatchStore, FileOutcome};

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub page_count: u64,
}

/// External extraction service boundary. Implementations fetch the
/// document bytes through their own processing record; the orchestrator
/// only hands over the claim metadata.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, file: &Claim) -> std::result::Result<Extraction, ExtractionError>;
}

pub struct ExtractionAdapter {
    extractor: Arc<dyn TextExtractor>,
    blob: Arc<dyn BlobStore>,
    usage: Arc<dyn UsageTracker>,
    store: BatchStore,
    max_retries: u32,
    retry_delay: Duration,
}

impl ExtractionAdapter {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        blob: Arc<dyn BlobStore>,
        usage: Arc<dyn UsageTracker>,
        store: BatchStore,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            extractor,
            blob,
            usage,
            store,
            max_retries,
            retry_delay,
        }
    }

    /// Runs extraction for a claimed file and records the terminal
    /// outcome. Returns the job row after the aggregate recompute.
    pub fn process(&self, claim: &Claim) -> Result<JobRow> {
        match self.extract_with_retry(claim) {
            Ok(extraction) => {
                let text_ref = self.blob.put(extraction.text.as_bytes())?;
                let (job, applied) = self.store.update_file_status(
                    &claim.file_id,
                    FileOutcome::Completed {
                        actual_pages: extraction.page_count,
                        text_ref,
                    },
                )?;
                // A late duplicate (stale claim re-completed elsewhere)
                // must not charge the owner a second time.
                if applied {
                    self.usage.debit_pages(&job.owner_id, extraction.page_count);
                }
                log::debug!(
                    "Extracted {} ({} pages) for job {}",
                    claim.filename,
                    extraction.page_count,
                    claim.job_id
                );
                Ok(job)
            }
            Err(err) => {
                log::warn!(
                    "Extraction failed for {} (job {}): {}",
                    claim.filename,
                    claim.job_id,
                    err
                );
                let (job, _) = self.store.update_file_status(
                    &claim.file_id,
                    FileOutcome::Failed {
                        code: err.code().to_string(),
                        message: err.message().to_string(),
                    },
                )?;
                Ok(job)
            }
        }
    }

    /// Retries transient errors up to the bound; the last transient
    /// error is what gets recorded when the bound is exhausted.
    fn extract_with_retry(
        &self,
        claim: &Claim,
    ) -> std::result::Result<Extraction, ExtractionError> {
        let mut attempt = 0;
        loop {
            match self.extractor.extract(claim) {
                Ok(extraction) => return Ok(extraction),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::debug!(
                        "Transient extraction error for {} (attempt {}/{}): {}",
                        claim.filename,
                        attempt,
                        self.max_retries,
                        err
                    );
                    if !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
