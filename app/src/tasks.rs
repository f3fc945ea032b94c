//! Deferred background jobs.
//!
//! Every delayed side effect of the orchestrator (deployment steps, the fallback timer,
//! scaling settle, backup and restore completion) is scheduled here. Jobs cannot be
//! cancelled; they run to completion or until the process exits. [`TaskQueue::flush`]
//! waits for every scheduled job, including jobs scheduled by other jobs, which lets the
//! CLI and tests observe the settled state without relying on wall-clock sleeps.

use futures::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::*;

use crate::error::Error;
use crate::metrics::{BACKGROUND_JOBS_PENDING, BACKGROUND_JOBS_TOTAL};

struct ScheduledJob {
    name: &'static str,
    handle: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct TaskQueue {
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
    pending: Arc<AtomicUsize>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` after `delay`. Failures are logged and swallowed.
    pub fn schedule<F>(&self, name: &'static str, delay: Duration, job: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        BACKGROUND_JOBS_PENDING.inc();

        let pending = self.pending.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            trace!(job = name, "Running background job");
            let outcome = match job.await {
                Ok(()) => "success",
                Err(e) => {
                    warn!(job = name, error = %e, "Background job failed");
                    e.kind().into()
                }
            };
            BACKGROUND_JOBS_TOTAL
                .with_label_values(&[name, outcome])
                .inc();
            BACKGROUND_JOBS_PENDING.dec();
            pending.fetch_sub(1, Ordering::SeqCst);
        });

        debug!(job = name, ?delay, "Scheduled background job");
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        // finished handles carry nothing flush still needs
        jobs.retain(|job| !job.handle.is_finished());
        jobs.push(ScheduledJob { name, handle });
    }

    /// Jobs scheduled and not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits until every scheduled job, including ones scheduled while flushing, has run
    pub async fn flush(&self) {
        loop {
            let batch = std::mem::take(
                &mut *self.jobs.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                return;
            }
            for job in batch {
                if let Err(e) = job.handle.await {
                    error!(job = job.name, "Background job panicked: {e}");
                }
            }
        }
    }

    #[cfg(test)]
    fn retained(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
