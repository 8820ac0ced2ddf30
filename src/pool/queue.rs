//! Shared job queue with bounded-wait pops.

use crate::manifest::Job;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// FIFO queue shared by all workers of a pool.
///
/// Once closed, `pop` stops waiting for new jobs and returns `None` as soon
/// as the queue is empty. Requeued jobs are still handed out after close.
#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn extend(&self, jobs: impl IntoIterator<Item = Job>) {
        let mut queue = self.lock();
        let before = queue.len();
        queue.extend(jobs);
        let added = queue.len() - before;
        drop(queue);
        for _ in 0..added {
            self.notify.notify_one();
        }
    }

    /// Put a job back at the front so it is picked up next.
    pub fn requeue(&self, job: Job) {
        self.lock().push_front(job);
        self.notify.notify_one();
    }

    /// Stop waiting for producers. Wakes every waiting consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_pop(&self) -> Option<Job> {
        self.lock().pop_front()
    }

    /// Pop the next job, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            if self.is_closed() {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }
}
