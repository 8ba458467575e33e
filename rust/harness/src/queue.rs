//! Job queue with outstanding-work tracking.
//!
//! A job stays outstanding from planning until its terminal outcome; retries
//! put it back without changing the count. When the count reaches zero the
//! queue closes and every waiting worker sees the end of work.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Notify;

use crate::plan::Job;

struct QueueState {
    pending: VecDeque<Job>,
    outstanding: usize,
    closed: bool,
}

pub struct JobQueue {
    state: Mutex<QueueState>,
    wakeup: Notify,
}

impl JobQueue {
    #[must_use]
    pub fn new(jobs: Vec<Job>) -> Self {
        let outstanding = jobs.len();
        Self {
            state: Mutex::new(QueueState {
                pending: jobs.into(),
                outstanding,
                closed: outstanding == 0,
            }),
            wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next job to run, or `None` once all work is terminal.
    ///
    /// Waits while the queue is empty but jobs are still running, since a
    /// running job may come back as a retry.
    pub async fn next(&self) -> Option<Job> {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(job) = state.pending.pop_front() {
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Put a failed job back; it stays outstanding.
    pub fn retry(&self, job: Job) {
        self.lock().pending.push_back(job);
        self.wakeup.notify_one();
    }

    /// Record a terminal outcome for one job.
    pub fn complete(&self) {
        let closed = {
            let mut state = self.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.outstanding == 0 {
                state.closed = true;
            }
            state.closed
        };
        if closed {
            self.wakeup.notify_waiters();
        }
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    fn job(label: &str) -> Job {
        Job::new(label, "probe", Vec::new())
    }

    #[tokio::test]
    async fn test_empty_queue_is_closed() {
        let queue = JobQueue::new(Vec::new());
        assert!(queue.is_closed());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_retry_keeps_job_outstanding() {
        let queue = JobQueue::new(vec![job("a"), job("b")]);
        let a = queue.next().await.unwrap();
        assert_eq!(a.label, "a");

        queue.retry(a.retried());
        assert_eq!(queue.outstanding(), 2);
        assert_eq!(queue.next().await.unwrap().label, "b");
        queue.complete();

        let again = queue.next().await.unwrap();
        assert_eq!((again.label.as_str(), again.retries), ("a", 1));
        queue.complete();

        assert!(queue.is_closed());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_idle_workers_wake_on_close() {
        let queue = Arc::new(JobQueue::new(vec![job("only")]));
        let running = queue.next().await.unwrap();

        let idle: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.next().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(idle.iter().all(|h| !h.is_finished()));

        drop(running);
        queue.complete();
        for handle in idle {
            let next = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
            assert!(next.is_none());
        }
    }

    #[tokio::test]
    async fn test_idle_worker_picks_up_retry() {
        let queue = Arc::new(JobQueue::new(vec![job("flaky")]));
        let first = queue.next().await.unwrap();

        let idle = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.retry(first.retried());

        let picked = tokio::time::timeout(Duration::from_secs(5), idle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(picked.retries, 1);
        assert!(!queue.is_closed());
    }
}
