//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::job_repo::JobRow;
use crate::types::JobStatus;

/// Progress event emitted after every aggregate recompute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Derived job status after the recompute.
    pub status: JobStatus,
    /// Files in a terminal status.
    pub processed_files: u64,
    /// Files that failed.
    pub failed_files: u64,
    /// Total files in the job.
    pub total_files: u64,
    /// Actual pages summed over completed files.
    pub processed_pages: u64,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Builds an event from a freshly recomputed job row.
    pub fn from_job(job: &JobRow) -> Self {
        let status = JobStatus::parse(&job.status).unwrap_or_else(|| {
            log::warn!(
                "Unknown job status '{}' for job {}, defaulting to processing",
                job.status,
                job.id
            );
            JobStatus::Processing
        });
        Self {
            job_id: job.id.clone(),
            status,
            processed_files: job.processed_files,
            failed_files: job.failed_files,
            total_files: job.total_files,
            processed_pages: job.processed_pages,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(status: &str) -> JobRow {
        JobRow {
            id: "j1".to_string(),
            owner_id: "o1".to_string(),
            name: "batch".to_string(),
            priority: 5,
            merge_requested: false,
            merge_format: None,
            total_files: 4,
            processed_files: 2,
            failed_files: 1,
            total_pages: 12,
            processed_pages: 7,
            status: status.to_string(),
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_event_from_job() {
        let event = JobProgressEvent::from_job(&sample_row("processing"));
        assert_eq!(event.job_id, "j1");
        assert_eq!(event.status, JobStatus::Processing);
        assert_eq!(event.processed_files, 2);
        assert_eq!(event.failed_files, 1);
        assert_eq!(event.total_files, 4);
        assert_eq!(event.processed_pages, 7);
    }

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::from_job(&sample_row("completed")));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "j1");
        assert_eq!(received.status, JobStatus::Completed);
    }

    #[test]
    fn test_send_without_receivers_is_fine() {
        let broadcaster = JobProgressBroadcaster::new(10);
        broadcaster.send(JobProgressEvent::from_job(&sample_row("pending")));
    }
}
