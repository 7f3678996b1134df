//! Worker pool: N threads that pull claims from the scheduler and run
//! them through the extraction adapter.
//!
//! Workers are pull-based: there is no submission channel, the database
//! is the queue. An idle worker sleeps briefly between empty polls so a
//! drained queue does not spin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::extract::ExtractionAdapter;
use crate::scheduler::Scheduler;

const IDLE_POLL_DELAY: Duration = Duration::from_millis(100);

/// Notification that a worker finished one file.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub job_id: String,
    pub file_id: String,
    pub filename: String,
    /// Job status after the file landed.
    pub job_status: String,
}

pub struct WorkerPool {
    result_receiver: Receiver<FileResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` extraction workers.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(scheduler: Scheduler, adapter: Arc<ExtractionAdapter>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (result_sender, result_receiver) = unbounded::<FileResult>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker_scheduler = scheduler.clone();
            let worker_adapter = Arc::clone(&adapter);
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    worker_scheduler,
                    worker_adapter,
                    result_tx,
                    shutdown_flag,
                );
            });
            workers.push(handle);
        }

        info!("Started {} extraction workers", worker_count);

        Self {
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn try_recv_result(&self) -> Option<FileResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<FileResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<FileResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Waits for all workers to exit. Call `shutdown` first, otherwise
    /// this blocks until they stop on their own (they never do).
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    scheduler: Scheduler,
    adapter: Arc<ExtractionAdapter>,
    result_sender: Sender<FileResult>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Worker {} started", worker_id);

    while !shutdown.load(Ordering::Relaxed) {
        let claim = match scheduler.claim_next_file() {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                thread::sleep(IDLE_POLL_DELAY);
                continue;
            }
            Err(e) => {
                error!("Worker {} failed to claim work: {}", worker_id, e);
                thread::sleep(IDLE_POLL_DELAY);
                continue;
            }
        };

        debug!(
            "Worker {} processing {} (job {})",
            worker_id, claim.filename, claim.job_id
        );

        match adapter.process(&claim) {
            Ok(job) => {
                let result = FileResult {
                    job_id: claim.job_id,
                    file_id: claim.file_id,
                    filename: claim.filename,
                    job_status: job.status,
                };
                if result_sender.send(result).is_err() {
                    debug!("Worker {} result channel disconnected", worker_id);
                    break;
                }
            }
            Err(e) => {
                // The adapter records extraction failures itself, so an
                // error here means the record could not be written.
                error!(
                    "Worker {} could not record outcome for file {}: {}",
                    worker_id, claim.file_id, e
                );
                thread::sleep(IDLE_POLL_DELAY);
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
