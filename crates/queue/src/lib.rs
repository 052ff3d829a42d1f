//! Work queue for pending jobs: a FIFO of ready jobs plus a delay heap for requeues.
//!
//! Requeued jobs sit in the delay heap until their due instant and are moved to
//! the back of the FIFO the next time the queue is observed. No task is spawned
//! per requeue. Time comes from `tokio::time`, so paused-clock tests work.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tfo_core::JobRef;
use tokio::time::Instant;
use tracing::debug;

struct Delayed {
    due: Instant,
    seq: u64,
    job: JobRef,
}

// Reversed so the BinaryHeap pops the earliest due entry first; seq breaks ties in insertion order.
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

#[derive(Default)]
struct Inner {
    ready: VecDeque<JobRef>,
    delayed: BinaryHeap<Delayed>,
    seq: u64,
}

impl Inner {
    fn promote(&mut self, now: Instant) {
        while self.delayed.peek().map(|d| d.due <= now).unwrap_or(false) {
            if let Some(d) = self.delayed.pop() {
                debug!(uid = %d.job.uid, "requeued job is due");
                self.ready.push_back(d.job);
            }
        }
    }
}

/// Cloneable handle to the shared queue. No deduplication: the same job may be queued many times.
#[derive(Clone, Default)]
pub struct WorkQueue {
    inner: Arc<Mutex<Inner>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Inner holds no invariants a panicking holder could break halfway.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_promoted(&self) -> MutexGuard<'_, Inner> {
        let mut g = self.lock();
        g.promote(Instant::now());
        g
    }

    pub fn push_back(&self, job: JobRef) {
        self.lock().ready.push_back(job);
    }

    /// Remove the earliest ready job, first moving any due requeues to the back.
    pub fn pop_front(&self) -> Option<JobRef> {
        self.lock_promoted().ready.pop_front()
    }

    /// Number of jobs ready to be popped now.
    pub fn len(&self) -> usize {
        self.lock_promoted().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of requeued jobs still waiting for their delay to elapse.
    pub fn delayed_len(&self) -> usize {
        self.lock_promoted().delayed.len()
    }

    /// Schedule exactly one future `push_back` of `job` after `delay`. Never blocks.
    pub fn push_after(&self, job: JobRef, delay: Duration) {
        let mut g = self.lock();
        let seq = g.seq;
        g.seq = g.seq.wrapping_add(1);
        g.delayed.push(Delayed { due: Instant::now() + delay, seq, job });
    }

    /// True when a job with this uid is ready or waiting to be requeued.
    pub fn contains(&self, uid: &str) -> bool {
        let g = self.lock();
        g.ready.iter().any(|j| j.uid == uid) || g.delayed.iter().any(|d| d.job.uid == uid)
    }

    /// Due instant of the earliest pending requeue, if any.
    pub fn next_due(&self) -> Option<Instant> {
        self.lock().delayed.peek().map(|d| d.due)
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let g = self.lock();
        f.debug_struct("WorkQueue").field("ready", &g.ready.len()).field("delayed", &g.delayed.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(uid: &str) -> JobRef {
        JobRef::new(uid, "ns", "secret")
    }

    #[test]
    fn fifo_order() {
        let q = WorkQueue::new();
        q.push_back(job("a"));
        q.push_back(job("b"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front().unwrap().uid, "a");
        assert_eq!(q.pop_front().unwrap().uid, "b");
        assert!(q.pop_front().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn duplicates_are_kept() {
        let q = WorkQueue::new();
        q.push_back(job("a"));
        q.push_back(job("a"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn zero_delay_requeue_is_ready_immediately() {
        let q = WorkQueue::new();
        q.push_after(job("a"), Duration::ZERO);
        assert_eq!(q.len(), 1);
        assert_eq!(q.delayed_len(), 0);
    }

    #[test]
    fn contains_sees_ready_and_delayed() {
        let q = WorkQueue::new();
        q.push_back(job("a"));
        q.push_after(job("b"), Duration::from_secs(60));
        assert!(q.contains("a"));
        assert!(q.contains("b"));
        assert!(!q.contains("c"));
    }
}
