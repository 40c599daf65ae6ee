//! Bounded pool of dedicated OS threads for blocking handlers.
//!
//! The scheduling task must never block, so anything tagged with the
//! blocking handler kind is shipped here and its completion is bridged back
//! as a future via a oneshot channel.
//!
//! There is no rejection policy: excess submissions queue inside the pool's
//! channel and simply wait for a free worker. Worker-side panics are caught
//! and surfaced through the ticket, never taking a worker down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::core::error::{AppResult, SchedulerError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Jobs waiting in the pool's channel.
    pub queued_jobs: u64,
    /// Jobs currently executing.
    pub active_jobs: u64,
    /// Jobs that completed successfully.
    pub completed_jobs: u64,
    /// Jobs that returned an error or panicked.
    pub failed_jobs: u64,
    /// Total jobs submitted.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct PoolCounters {
    queued_jobs: AtomicU64,
    active_jobs: AtomicU64,
    completed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    submitted_jobs: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Future handle for a submitted job; resolves when the job finishes.
#[derive(Debug)]
pub struct PoolTicket {
    rx: oneshot::Receiver<AppResult<()>>,
}

impl PoolTicket {
    /// Await the job's outcome without blocking the scheduling task.
    ///
    /// # Errors
    ///
    /// The job's own error, `SchedulerError::HandlerPanic` if it panicked,
    /// or `SchedulerError::PoolShutdown` if the pool went away first.
    pub async fn wait(self) -> AppResult<()> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::Error::new(SchedulerError::PoolShutdown)),
        }
    }
}

/// Bounded set of worker threads executing blocking jobs.
///
/// Created once at process init and shared by reference. `submit` is the
/// only entry point the dispatcher uses. On shutdown, in-flight and queued
/// jobs are allowed to finish before the workers are released.
pub struct WorkerPool {
    worker_count: usize,
    job_tx: Mutex<Option<Sender<Job>>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn a pool with `worker_count` dedicated OS threads.
    #[must_use]
    pub fn new(worker_count: usize, thread_stack_size: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|worker_id| spawn_worker(worker_id, job_rx.clone(), thread_stack_size))
            .collect();

        info!(worker_count, "worker pool initialized");

        Self {
            worker_count,
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    /// Submit a blocking job; returns a future-backed ticket for its outcome.
    /// The enqueue itself never blocks.
    ///
    /// # Errors
    ///
    /// `SchedulerError::PoolShutdown` once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> Result<PoolTicket, SchedulerError>
    where
        F: FnOnce() -> AppResult<()> + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolShutdown);
        }

        let (tx, rx) = oneshot::channel();
        let counters = Arc::clone(&self.counters);
        let wrapped: Job = Box::new(move || {
            counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
            counters.active_jobs.fetch_add(1, Ordering::Relaxed);

            let outcome = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result,
                Err(payload) => Err(anyhow::Error::new(SchedulerError::HandlerPanic(
                    panic_message(payload.as_ref()),
                ))),
            };

            counters.active_jobs.fetch_sub(1, Ordering::Relaxed);
            if outcome.is_ok() {
                counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
            }
            // Receiver may have been dropped; the outcome is still counted.
            let _ = tx.send(outcome);
        });

        let job_tx_guard = self.job_tx.lock();
        let Some(job_tx) = job_tx_guard.as_ref() else {
            return Err(SchedulerError::PoolShutdown);
        };
        // Counted before the send: a worker may pick the job up and run the
        // `queued_jobs` decrement immediately, and the counter must not
        // transiently wrap below zero in a concurrent stats snapshot.
        self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        if job_tx.send(wrapped).is_err() {
            self.counters.submitted_jobs.fetch_sub(1, Ordering::Relaxed);
            self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
            return Err(SchedulerError::PoolShutdown);
        }
        Ok(PoolTicket { rx })
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Shut down gracefully: stop accepting jobs, let queued and in-flight
    /// jobs finish, then join all workers.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("shutting down worker pool");

        // Dropping the sender drains naturally: workers finish the backlog
        // and exit when recv fails.
        {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
        }

        let mut workers = self.workers.lock();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                tracing::warn!(worker_id = idx, "worker exited via panic");
            }
        }

        info!(worker_count = self.worker_count, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but do not join in Drop; explicit shutdown() is
        // required for graceful cleanup.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
            debug!("worker pool dropped without explicit shutdown");
        }
    }
}

fn spawn_worker(worker_id: usize, job_rx: Receiver<Job>, stack_size: usize) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("th-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");
            // Blocking recv; returns Err once the sender is dropped and the
            // backlog is drained, which is the exit signal.
            while let Ok(job) = job_rx.recv() {
                job();
            }
            debug!(worker_id, "worker thread exiting");
        })
        .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload.downcast_ref::<&str>().map_or_else(
        || {
            payload
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "opaque panic payload".to_owned())
        },
        |s| (*s).to_owned(),
    )
}
