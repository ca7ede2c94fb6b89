//! Bounded-concurrency delivery for a single [`JobQueue`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{EnqueueOptions, JobQueue};
use crate::models::RenewalJob;

/// Handles a single delivered job. The returned `bool` tells the pool whether the job is
/// actually finished: `true` means the pool should release the in-flight marker and clean
/// up the payload as usual, `false` means the handler already re-enqueued the same job id
/// itself (the same-day re-queue) and the pool must leave the queue's bookkeeping alone, or
/// its own cleanup would delete the payload the re-queue just wrote.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_id: &str, job: RenewalJob) -> bool;
}

/// Polls a [`JobQueue`] for due jobs and dispatches them to `handler`, running at most
/// `concurrency` jobs at a time.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, concurrency: usize) -> Self {
        Self {
            queue: Arc::new(queue),
            handler,
            concurrency,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Run until the returned handle is aborted or the process exits. Each due job is
    /// dispatched as its own task, bounded by a semaphore sized to `concurrency`.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let available = semaphore.available_permits();
            if available == 0 {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let claimed = match self.queue.claim_due(available as isize).await {
                Ok(jobs) => jobs,
                Err(err) => {
                    tracing::error!(queue = %self.queue.name(), error = %err, "failed to claim due jobs");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            if claimed.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            for (job_id, job) in claimed {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let queue = self.queue.clone();
                let handler = self.handler.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    let finished = handler.handle(&job_id, job).await;
                    if !finished {
                        // Handler already re-enqueued this job id itself; its enqueue call
                        // released the in-flight marker, and our payload key now belongs to
                        // the new pending entry. Touching either here would undo it.
                        return;
                    }
                    // Worker handlers manage their own ledger append; completion here only
                    // releases the dedup guard so a future day's dispatch can re-enqueue.
                    let opts = EnqueueOptions {
                        delay_ms: 0,
                        job_id: job_id.clone(),
                        remove_on_complete: true,
                        remove_on_fail: true,
                    };
                    if let Err(err) = queue.complete(&job_id, &opts, true).await {
                        tracing::error!(job_id = %job_id, error = %err, "failed to release job after handling");
                    }
                });
            }
        }
    }
}
