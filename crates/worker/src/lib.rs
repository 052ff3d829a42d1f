//! tfo worker – the polling/reconciliation loop.
//!
//! One job at a time: pop, poll, validate the whole batch, then apply each object
//! in order. Recoverable failures go back to the queue after a fixed delay with no
//! backoff and no retry cap, so a job that keeps failing is retried forever at the
//! same cadence.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tfo_apply::{ApplyOutcome, Reconciler};
use tfo_core::{is_not_registered, validate_batch, JobRef};
use tfo_poll::PollClient;
use tfo_queue::WorkQueue;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

mod source;

pub use source::{run_job_source, seed, RELIST_INTERVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep when the queue is empty.
    pub idle_interval: Duration,
    /// Delay before a failed or pending job is polled again.
    pub requeue_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { idle_interval: Duration::from_secs(3), requeue_delay: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    PollFailed,
    /// The job's workflow is still running.
    Pending,
    Unsuccessful,
    MalformedBatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Skipped => self.skipped += 1,
            ApplyOutcome::Failed => self.failed += 1,
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Idle,
    /// Job has no outputs secret; discarded without polling.
    Skipped,
    /// The poll API does not know the job; never retried.
    Dropped,
    Requeued(RequeueReason),
    Reconciled(BatchSummary),
}

pub struct Worker {
    queue: WorkQueue,
    poll: Arc<dyn PollClient>,
    reconciler: Reconciler,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(queue: WorkQueue, poll: Arc<dyn PollClient>, reconciler: Reconciler, config: WorkerConfig) -> Self {
        Self { queue, poll, reconciler, config }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Process jobs forever.
    pub async fn run(&self) {
        info!(idle = ?self.config.idle_interval, requeue = ?self.config.requeue_delay, "queue worker started");
        loop {
            let outcome = self.tick().await;
            debug!(?outcome, "iteration done");
        }
    }

    /// One iteration: sleep if idle, otherwise handle exactly one job.
    ///
    /// The idle sleep is cut short when a requeued job falls due before it ends.
    pub async fn tick(&self) -> Outcome {
        let Some(job) = self.queue.pop_front() else {
            tokio::time::sleep(self.idle_sleep()).await;
            return Outcome::Idle;
        };
        if !job.should_poll() {
            return Outcome::Skipped;
        }
        self.handle(job).await
    }

    fn idle_sleep(&self) -> Duration {
        match self.queue.next_due() {
            Some(due) => self.config.idle_interval.min(due.saturating_duration_since(Instant::now())),
            None => self.config.idle_interval,
        }
    }

    async fn handle(&self, job: JobRef) -> Outcome {
        let uid = job.uid.clone();
        info!(uid = %uid, name = %job.name, "checking for resources");

        let result = match self.poll.read(&job).await {
            Ok(r) => r,
            Err(e) => {
                warn!(uid = %uid, error = %e, "poll failed");
                counter!("poll_errors_total", 1u64);
                return self.requeue(job, RequeueReason::PollFailed);
            }
        };

        if result.is_pending() {
            debug!(uid = %uid, "workflow has not completed");
            return self.requeue(job, RequeueReason::Pending);
        }

        if !result.is_success {
            info!(uid = %uid, err_msg = %result.err_msg, "poll answered but job is not successful");
            if is_not_registered(&result.err_msg, &uid) {
                counter!("jobs_dropped_total", 1u64);
                return Outcome::Dropped;
            }
            return self.requeue(job, RequeueReason::Unsuccessful);
        }

        let items = match validate_batch(&result.data.data) {
            Ok(items) => items,
            Err(e) => {
                error!(uid = %uid, error = %e, "poll response in unexpected format");
                counter!("batches_rejected_total", 1u64);
                return self.requeue(job, RequeueReason::MalformedBatch);
            }
        };

        let mut summary = BatchSummary::default();
        for item in items {
            summary.record(self.reconciler.apply(item.as_bytes(), &job.namespace).await);
        }
        info!(
            uid = %uid,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "done handling job"
        );
        Outcome::Reconciled(summary)
    }

    fn requeue(&self, job: JobRef, reason: RequeueReason) -> Outcome {
        debug!(uid = %job.uid, ?reason, after = ?self.config.requeue_delay, "requeue");
        counter!("jobs_requeued_total", 1u64);
        self.queue.push_after(job, self.config.requeue_delay);
        Outcome::Requeued(reason)
    }
}
