//! Background reaper: periodically deletes expired outputs and
//! releases stale processing claims.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::scheduler::Scheduler;
use crate::token::TokenService;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub struct Reaper {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Reaper {
    /// Spawns the reaper thread. The first sweep runs immediately,
    /// subsequent sweeps every `interval`.
    pub fn spawn(
        tokens: TokenService,
        scheduler: Scheduler,
        interval: Duration,
        claim_timeout: chrono::Duration,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            log::debug!("Reaper started (interval {:?})", interval);
            loop {
                sweep(&tokens, &scheduler, claim_timeout);

                let mut waited = Duration::ZERO;
                while waited < interval {
                    if shutdown_flag.load(Ordering::Relaxed) {
                        log::debug!("Reaper stopped");
                        return;
                    }
                    thread::sleep(SHUTDOWN_POLL);
                    waited += SHUTDOWN_POLL;
                }
            }
        });

        Self {
            handle: Some(handle),
            shutdown,
        }
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sweep(tokens: &TokenService, scheduler: &Scheduler, claim_timeout: chrono::Duration) {
    if let Err(e) = tokens.reap_expired() {
        log::error!("Output reaping failed: {}", e);
    }
    if let Err(e) = scheduler.release_stale_claims(claim_timeout) {
        log::error!("Stale claim release failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::output_repo;
    use crate::db::{job_repo, Database};
    use crate::storage::MemoryBlobStore;
    use chrono::Utc;

    #[test]
    fn test_reaper_sweeps_on_start_and_stops() {
        let db = Database::open_in_memory().unwrap();
        let blob = Arc::new(MemoryBlobStore::new());
        db.with_conn(|conn| {
            job_repo::insert(conn, &job_repo::tests::sample_job("j1"))?;
            let mut output = output_repo::tests::sample_output("o1", "j1", "tok-1");
            output.expires_at = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
            output_repo::insert(conn, &output)
        })
        .unwrap();

        let tokens = TokenService::new(db.clone(), blob);
        let scheduler = Scheduler::new(db.clone());
        let reaper = Reaper::spawn(
            tokens,
            scheduler,
            Duration::from_secs(3600),
            chrono::Duration::seconds(600),
        );

        // The initial sweep removes the expired output.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = db
                .with_conn(|conn| output_repo::list_for_job(conn, "j1"))
                .unwrap();
            if remaining.is_empty() {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "output never reaped");
            thread::sleep(Duration::from_millis(20));
        }

        reaper.stop();
    }
}
