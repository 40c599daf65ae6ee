//! Durable backend adapter: same enqueue contract as the in-memory queue,
//! backed by an external store with one dedicated polling worker.
//!
//! Trades concurrency for crash survivability: the single blocking worker
//! thread polls the store with the dispatcher's backoff discipline and
//! invokes `perform` on each record. Redelivery, if any, is the store's
//! business.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::core::error::SchedulerError;
use crate::core::queue::TaskSink;
use crate::core::task::{TaskArgs, TaskRecord};
use crate::infra::store::DurableStore;

/// Routes tasks to a [`DurableStore`] and drives them with a dedicated
/// background worker. Interchangeable with the in-memory queue at the
/// `TaskSink` seam.
pub struct DurableBackend {
    store: Arc<dyn DurableStore>,
    seq: AtomicU64,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DurableBackend {
    /// Create an adapter over `store`, polling with `poll_interval` backoff.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            seq: AtomicU64::new(0),
            poll_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Start the background worker. Subsequent calls are no-ops.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let poll_interval = self.poll_interval;
        let handle = thread::Builder::new()
            .name("durable-worker".into())
            .spawn(move || worker_loop(&*store, &shutdown, poll_interval))
            .unwrap_or_else(|e| panic!("failed to spawn durable worker: {e}"));
        *worker = Some(handle);
        info!(poll_interval_ms = poll_interval.as_millis() as u64, "durable worker started");
    }

    /// Stop the worker after its current record, then join it.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("durable worker exited via panic");
            }
        }
    }
}

impl TaskSink for DurableBackend {
    fn put(&self, event: &str, args: TaskArgs, priority: i64) -> Result<u64, SchedulerError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let record = TaskRecord {
            event: event.to_owned(),
            args,
            priority,
            seq,
        };
        self.store.put(&record)?;
        Ok(seq)
    }
}

impl Drop for DurableBackend {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Worker joins only on explicit shutdown(); dropping detaches it.
    }
}

/// Build a performer that hands each stored record to `sink`, preserving
/// event name, arguments, and priority. Wiring a store's performer to the
/// in-memory queue makes the durable backend a crash-surviving front for
/// the regular dispatch path.
#[must_use]
pub fn enqueue_performer(sink: Arc<dyn TaskSink>) -> crate::infra::store::Performer {
    Arc::new(move |record: TaskRecord| {
        sink.put(&record.event, record.args, record.priority)?;
        Ok(())
    })
}

fn worker_loop(store: &dyn DurableStore, shutdown: &AtomicBool, poll_interval: Duration) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match store.get(false) {
            Ok(Some(record)) => {
                let event = record.event.clone();
                let seq = record.seq;
                debug!(event = %event, seq, "performing durable task");
                if let Err(err) = store.perform(record) {
                    error!(event = %event, seq, error = %err, "durable task failed");
                }
            }
            Ok(None) => thread::sleep(poll_interval),
            Err(err) => {
                error!(error = %err, "durable store poll failed");
                thread::sleep(poll_interval);
            }
        }
    }
    debug!("durable worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::store::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn put_assigns_monotonic_sequence() {
        let store = Arc::new(MemoryStore::new(Arc::new(|_| Ok(()))));
        let backend = DurableBackend::new(store, Duration::from_millis(5));
        let a = backend.put("t", TaskArgs::new(), 0).unwrap();
        let b = backend.put("t", TaskArgs::new(), 0).unwrap();
        assert!(b > a);
    }

    #[test]
    fn worker_performs_stored_tasks() {
        let performed = Arc::new(AtomicUsize::new(0));
        let performed_clone = Arc::clone(&performed);
        let store = Arc::new(MemoryStore::new(Arc::new(move |_| {
            performed_clone.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })));

        let backend = DurableBackend::new(Arc::clone(&store) as Arc<dyn DurableStore>, Duration::from_millis(5));
        backend.put("t", TaskArgs::new(), 0).unwrap();
        backend.put("t", TaskArgs::new(), 0).unwrap();
        backend.start();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while performed.load(Ordering::Relaxed) < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        backend.shutdown();
        assert_eq!(performed.load(Ordering::Relaxed), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn perform_error_does_not_kill_the_worker() {
        let performed = Arc::new(AtomicUsize::new(0));
        let performed_clone = Arc::clone(&performed);
        let store = Arc::new(MemoryStore::new(Arc::new(move |record: TaskRecord| {
            performed_clone.fetch_add(1, Ordering::Relaxed);
            if record.seq == 0 {
                Err(anyhow::anyhow!("first one fails"))
            } else {
                Ok(())
            }
        })));

        let backend = DurableBackend::new(store as Arc<dyn DurableStore>, Duration::from_millis(5));
        backend.put("t", TaskArgs::new(), 0).unwrap();
        backend.put("t", TaskArgs::new(), 0).unwrap();
        backend.start();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while performed.load(Ordering::Relaxed) < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        backend.shutdown();
        assert_eq!(performed.load(Ordering::Relaxed), 2);
    }
}
