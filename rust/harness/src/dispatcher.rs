//! Fans jobs out over the device pool.
//!
//! One worker per device pulls jobs from a shared [`JobQueue`], leases a
//! device, runs the job confined to it, and either finishes the job or puts
//! it back for another attempt after resetting the device.

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};

use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    device::DeviceReset,
    plan::Job,
    pool::DevicePool,
    queue::JobQueue,
    runner::JobRunner,
    state::{StateError, StateManager},
};

/// Counts of terminal outcomes, shared by all workers.
struct Progress {
    total: usize,
    done: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    attempts: AtomicU32,
    bar: ProgressBar,
}

impl Progress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>4}/{len:4} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            // RunPod won't print fancier chars properly
            .progress_chars("#*-"),
        );
        Self {
            total,
            done: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            attempts: AtomicU32::new(0),
            bar,
        }
    }

    /// Record a terminal outcome and report progress.
    ///
    /// Returns the number of finished jobs including this one. Every call
    /// gets a distinct number.
    fn finish_job(&self, success: bool) -> usize {
        let counter = if success { &self.succeeded } else { &self.failed };
        counter.fetch_add(1, Ordering::SeqCst);
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;

        let percent = done as f64 / self.total as f64 * 100.0;
        tracing::info!("Progress: {done}/{} ({percent:.2}%)", self.total);
        self.bar.set_position(done as u64);
        self.bar
            .set_message(format!("{} failed", self.failed.load(Ordering::SeqCst)));
        done
    }

    fn summary(&self) -> DispatchSummary {
        DispatchSummary {
            total: self.total,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
        }
    }
}

/// State shared by every worker.
struct Shared {
    queue: JobQueue,
    pool: Arc<DevicePool>,
    runner: Arc<dyn JobRunner>,
    reset: Arc<dyn DeviceReset>,
    ledger: Option<Arc<StateManager>>,
    progress: Progress,
    max_retries: u32,
}

impl Shared {
    fn record(&self, what: &str, update: impl FnOnce(&StateManager) -> Result<(), StateError>) {
        if let Some(ref ledger) = self.ledger
            && let Err(e) = update(ledger)
        {
            tracing::error!("Failed to record {what} in job ledger: {e}");
        }
    }

    fn finish(&self, job: &Job, error: Option<&str>) {
        match error {
            None => self.record("success", |l| l.mark_succeeded(&job.label)),
            Some(error) => self.record("failure", |l| l.mark_failed(&job.label, error)),
        }
        self.progress.finish_job(error.is_none());
        self.queue.complete();
    }
}

/// Dispatches jobs over a device pool.
pub struct Dispatcher {
    pool: Arc<DevicePool>,
    runner: Arc<dyn JobRunner>,
    reset: Arc<dyn DeviceReset>,
    ledger: Option<Arc<StateManager>>,
    max_retries: u32,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        pool: Arc<DevicePool>,
        runner: Arc<dyn JobRunner>,
        reset: Arc<dyn DeviceReset>,
        max_retries: u32,
    ) -> Self {
        Self {
            pool,
            runner,
            reset,
            ledger: None,
            max_retries,
        }
    }

    /// Record job progress in a ledger file.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<StateManager>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Run every job to a terminal outcome.
    pub async fn run(&self, jobs: Vec<Job>) -> Result<DispatchSummary, DispatchError> {
        if self.pool.size() == 0 {
            return Err(DispatchError::NoDevices);
        }
        if let Some(ref ledger) = self.ledger {
            ledger.initialize_jobs(&jobs)?;
        }

        let total = jobs.len();
        tracing::info!(
            "Dispatching {total} jobs over {} devices (max {} retries)",
            self.pool.size(),
            self.max_retries
        );

        let shared = Arc::new(Shared {
            queue: JobQueue::new(jobs),
            pool: Arc::clone(&self.pool),
            runner: Arc::clone(&self.runner),
            reset: Arc::clone(&self.reset),
            ledger: self.ledger.clone(),
            progress: Progress::new(total),
            max_retries: self.max_retries,
        });

        let workers: Vec<_> = (0..self.pool.size())
            .map(|id| tokio::spawn(worker(id, Arc::clone(&shared))))
            .collect();
        for handle in workers {
            handle
                .await
                .map_err(|e| DispatchError::Worker(e.to_string()))?;
        }

        shared.progress.bar.finish();
        Ok(shared.progress.summary())
    }
}

async fn worker(id: usize, shared: Arc<Shared>) {
    while let Some(job) = shared.queue.next().await {
        let lease = match shared.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!("Worker {id}: no device for {}: {e}", job.label);
                shared.finish(&job, Some(&e.to_string()));
                continue;
            }
        };
        let device = lease.device().clone();

        shared.progress.attempts.fetch_add(1, Ordering::SeqCst);
        shared.record("start", |l| l.mark_started(&job.label, device.index));
        tracing::info!(
            "Running: CUDA_VISIBLE_DEVICES={} {} (attempt {})",
            device.index,
            job.command_line(),
            job.attempt()
        );

        // A panicking runner surfaces as a join error instead of killing the worker.
        let attempt = {
            let runner = Arc::clone(&shared.runner);
            let job = job.clone();
            let device = device.clone();
            tokio::spawn(async move { runner.run(&job, &device).await }).await
        };
        let error = match attempt {
            Ok(Ok(outcome)) if outcome.success => None,
            Ok(Ok(outcome)) => Some(outcome.error.unwrap_or_else(|| "unknown error".into())),
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("job task failed: {e}")),
        };

        match error {
            None => {
                tracing::info!("{} succeeded on device {}", job.label, device.index);
                shared.finish(&job, None);
            }
            Some(error) if job.retries < shared.max_retries => {
                tracing::warn!(
                    "Error in {} on device {} (attempt {}): {error}",
                    job.label,
                    device.index,
                    job.attempt()
                );
                if let Err(e) = shared.reset.reset(&device).await {
                    tracing::warn!("{e}");
                }
                shared.record("retry", |l| l.mark_retrying(&job.label, &error));
                shared.queue.retry(job.retried());
            }
            Some(error) => {
                tracing::error!(
                    "{} failed after {} attempts: {error}",
                    job.label,
                    job.attempt()
                );
                shared.finish(&job, Some(&error));
            }
        }

        lease.release();
    }
    tracing::debug!("Worker {id} exiting");
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Jobs that failed every allowed attempt.
    pub failed: usize,
    /// Attempts started, retries included.
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no devices to dispatch to")]
    NoDevices,
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("worker task failed: {0}")]
    Worker(String),
}
