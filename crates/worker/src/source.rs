use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tfo_core::JobRef;
use tfo_kubehub::JobLister;
use tfo_queue::WorkQueue;
use tracing::{info, warn};

const LIST_RETRY: Duration = Duration::from_secs(30);

/// Default period between listings; jobs created after startup are picked up within it.
pub const RELIST_INTERVAL: Duration = Duration::from_secs(30);

/// Push every job the queue is not already tracking. Returns how many were pushed.
pub fn seed(queue: &WorkQueue, jobs: impl IntoIterator<Item = JobRef>) -> usize {
    let mut pushed = 0;
    for job in jobs {
        if queue.contains(&job.uid) {
            continue;
        }
        queue.push_back(job);
        pushed += 1;
    }
    counter!("jobs_seeded_total", pushed as u64);
    pushed
}

/// List jobs and seed the queue. With `relist` unset this returns after the first
/// successful pass; failed passes are retried.
pub async fn run_job_source(queue: WorkQueue, lister: Arc<dyn JobLister>, relist: Option<Duration>) {
    loop {
        let listed = match lister.list().await {
            Ok(jobs) => {
                let total = jobs.len();
                let pushed = seed(&queue, jobs);
                info!(listed = total, pushed, "seeded work queue");
                true
            }
            Err(e) => {
                warn!(error = %e, "listing jobs failed");
                false
            }
        };
        match relist {
            Some(every) => tokio::time::sleep(every).await,
            None if listed => return,
            None => tokio::time::sleep(LIST_RETRY).await,
        }
    }
}
