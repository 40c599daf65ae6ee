//! The consumer loop: polls the queue, resolves handlers, executes them.
//!
//! One cycle: `try_dequeue`; on empty, sleep for the poll interval and retry
//! (busy-poll with backoff — bounded latency when busy, one sleep when idle).
//! On a record, resolve the handler snapshot and run the handlers strictly in
//! list order, one at a time: cooperative handlers are awaited on the
//! scheduling task, blocking handlers go through the worker pool and their
//! tickets are awaited. The next record is not started until every handler
//! for the current one has finished — there is no cross-task overlap, so
//! throughput is bounded by the slowest task in the stream.
//!
//! Every handler invocation has its own failure boundary: a failing handler
//! is logged, counted, and recorded against its task record, and the loop
//! moves on. A hung cooperative handler still stalls the pipeline; nothing
//! here enforces timeouts.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::error::SchedulerError;
use crate::core::event::{EventRegistry, Handler};
use crate::core::queue::TaskQueue;
use crate::core::task::TaskRecord;
use crate::core::worker_pool::WorkerPool;

/// Observable dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    /// Sleeping out the poll interval after an empty poll.
    Idle = 0,
    /// Checking the queue for a record.
    Polling = 1,
    /// Executing handlers for a dequeued record.
    Dispatching = 2,
}

impl DispatcherState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Polling,
            2 => Self::Dispatching,
            _ => Self::Idle,
        }
    }
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Records whose handlers all ran (some may have failed).
    pub dispatched: u64,
    /// Individual handler invocations that returned an error.
    pub handler_failures: u64,
    /// Records dropped because no handler was registered.
    pub dropped_no_handler: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
    dropped_no_handler: AtomicU64,
}

impl DispatchCounters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dropped_no_handler: self.dropped_no_handler.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one dequeued task record.
#[derive(Debug)]
pub struct DispatchReport {
    /// The record that was processed.
    pub record: TaskRecord,
    /// Per-handler outcomes, in firing order.
    pub outcomes: Vec<Result<(), SchedulerError>>,
    /// Set when the record was dropped without running anything.
    pub error: Option<SchedulerError>,
}

impl DispatchReport {
    /// Number of handler invocations that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }
}

/// Shared, lock-protected audit sink handed to the dispatcher.
pub type SharedAudit = Arc<Mutex<Box<dyn AuditSink>>>;

/// Handle for observing and stopping a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    counters: Arc<DispatchCounters>,
}

impl DispatcherHandle {
    /// Ask the loop to exit; it stops between records.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

/// The queue consumer. Constructed once, then `run()` is spawned onto the
/// host's cooperative runtime.
pub struct Dispatcher {
    registry: Arc<EventRegistry>,
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    counters: Arc<DispatchCounters>,
    audit: Option<SharedAudit>,
}

impl Dispatcher {
    /// Create a dispatcher over the given registry, queue, and pool.
    #[must_use]
    pub fn new(
        registry: Arc<EventRegistry>,
        queue: Arc<TaskQueue>,
        pool: Arc<WorkerPool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            pool,
            poll_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(DispatcherState::Idle as u8)),
            counters: Arc::new(DispatchCounters::default()),
            audit: None,
        }
    }

    /// Attach an audit sink recording per-record outcomes.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAudit) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Handle for stopping and observing this dispatcher.
    #[must_use]
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shutdown: Arc::clone(&self.shutdown),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
        }
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run the consumer loop until shutdown is requested.
    pub async fn run(self) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "dispatcher started"
        );
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.set_state(DispatcherState::Polling);
            match self.queue.try_dequeue() {
                None => {
                    self.set_state(DispatcherState::Idle);
                    tokio::time::sleep(self.poll_interval).await;
                }
                Some(record) => {
                    self.set_state(DispatcherState::Dispatching);
                    let report = self.dispatch(record).await;
                    self.queue.mark_done();
                    debug!(
                        event = %report.record.event,
                        seq = report.record.seq,
                        handlers = report.outcomes.len(),
                        failed = report.failed(),
                        "record processed"
                    );
                }
            }
        }
        self.set_state(DispatcherState::Idle);
        info!("dispatcher stopped");
    }

    /// Process a single record: resolve handlers and run them in order,
    /// capturing each outcome. Public for direct-drive tests.
    pub async fn dispatch(&self, record: TaskRecord) -> DispatchReport {
        let handlers = self.registry.handlers(&record.event);
        if handlers.is_empty() {
            warn!(event = %record.event, seq = record.seq, "no handler for task, dropping");
            self.counters.dropped_no_handler.fetch_add(1, Ordering::Relaxed);
            self.audit(&record, "drop", Some("no handler registered".into()));
            let error = SchedulerError::NoHandlerForTask(record.event.clone());
            return DispatchReport {
                record,
                outcomes: Vec::new(),
                error: Some(error),
            };
        }

        self.audit(&record, "dispatch", None);

        let mut outcomes = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let outcome = self.invoke(handler, &record).await;
            if let Err(err) = &outcome {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    event = %record.event,
                    seq = record.seq,
                    error = %err,
                    "handler failed"
                );
                self.audit(&record, "fail", Some(err.to_string()));
            }
            outcomes.push(outcome);
        }

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        if outcomes.iter().all(Result::is_ok) {
            self.audit(&record, "complete", None);
        }
        DispatchReport {
            record,
            outcomes,
            error: None,
        }
    }

    /// Invoke one handler respecting its execution kind. Errors are returned,
    /// never propagated into the loop.
    async fn invoke(&self, handler: &Handler, record: &TaskRecord) -> Result<(), SchedulerError> {
        let args = record.args.clone();
        let result = if let Some(blocking) = handler.as_blocking() {
            match self.pool.submit(move || blocking(args)) {
                Ok(ticket) => ticket.wait().await,
                Err(err) => Err(anyhow::Error::new(err)),
            }
        } else {
            handler.invoke_inline(args).await
        };
        result.map_err(|source| SchedulerError::HandlerFailed {
            event: record.event.clone(),
            source,
        })
    }

    fn audit(&self, record: &TaskRecord, action: &str, detail: Option<String>) {
        if let Some(audit) = &self.audit {
            let mut sink = audit.lock();
            sink.record(build_audit_event(&record.event, record.seq, action, detail));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::InMemoryAuditSink;
    use crate::core::queue::TaskSink;
    use crate::core::task::TaskArgs;

    fn fixture() -> (Arc<EventRegistry>, Arc<TaskQueue>, Arc<WorkerPool>) {
        (
            Arc::new(EventRegistry::new()),
            Arc::new(TaskQueue::new()),
            Arc::new(WorkerPool::new(2, 512 * 1024)),
        )
    }

    #[tokio::test]
    async fn no_handler_record_is_dropped_with_report() {
        let (registry, queue, pool) = fixture();
        let dispatcher = Dispatcher::new(registry, Arc::clone(&queue), pool, Duration::from_millis(1));

        queue.put("orphan", TaskArgs::new(), 0).unwrap();
        let record = queue.try_dequeue().unwrap();
        let report = dispatcher.dispatch(record).await;

        assert!(report.outcomes.is_empty());
        assert!(matches!(
            report.error,
            Some(SchedulerError::NoHandlerForTask(ref e)) if e == "orphan"
        ));
        assert_eq!(dispatcher.handle().stats().dropped_no_handler, 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_later_handlers() {
        let (registry, queue, pool) = fixture();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        registry.attach(
            "job",
            Handler::cooperative(|_| async { Err(anyhow::anyhow!("first breaks")) }),
            0,
        );
        registry.attach(
            "job",
            Handler::cooperative(move |_| {
                let ran = Arc::clone(&ran_clone);
                async move {
                    ran.store(true, Ordering::Release);
                    Ok(())
                }
            }),
            1,
        );

        let dispatcher = Dispatcher::new(registry, Arc::clone(&queue), pool, Duration::from_millis(1));
        queue.put("job", TaskArgs::new(), 0).unwrap();
        let report = dispatcher.dispatch(queue.try_dequeue().unwrap()).await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failed(), 1);
        assert!(ran.load(Ordering::Acquire));
        assert_eq!(dispatcher.handle().stats().handler_failures, 1);
    }

    /// Sink that mirrors records into a shared vec for inspection.
    struct MirrorSink {
        seen: Arc<Mutex<Vec<crate::core::audit::AuditEvent>>>,
        inner: InMemoryAuditSink,
    }

    impl AuditSink for MirrorSink {
        fn record(&mut self, event: crate::core::audit::AuditEvent) {
            self.seen.lock().push(event.clone());
            self.inner.record(event);
        }
    }

    #[tokio::test]
    async fn audit_records_failure_against_the_record() {
        let (registry, queue, pool) = fixture();
        registry.attach(
            "job",
            Handler::blocking(|_| Err(anyhow::anyhow!("disk on fire"))),
            0,
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: SharedAudit = Arc::new(Mutex::new(Box::new(MirrorSink {
            seen: Arc::clone(&seen),
            inner: InMemoryAuditSink::new(16),
        })));
        let dispatcher = Dispatcher::new(registry, Arc::clone(&queue), pool, Duration::from_millis(1))
            .with_audit(sink);

        queue.put("job", TaskArgs::new(), 0).unwrap();
        let record = queue.try_dequeue().unwrap();
        let seq = record.seq;
        dispatcher.dispatch(record).await;

        let events = seen.lock();
        let fail = events.iter().find(|e| e.action == "fail").unwrap();
        assert_eq!(fail.task_event, "job");
        assert_eq!(fail.seq, seq);
        assert!(fail.detail.as_deref().unwrap().contains("disk on fire"));
    }

    #[tokio::test]
    async fn run_loop_processes_until_shutdown() {
        let (registry, queue, pool) = fixture();
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = Arc::clone(&count);
        registry.attach(
            "tick",
            Handler::cooperative(move |_| {
                let count = Arc::clone(&count_clone);
                async move {
                    count.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            }),
            0,
        );

        let dispatcher = Dispatcher::new(registry, Arc::clone(&queue), pool, Duration::from_millis(5));
        let handle = dispatcher.handle();
        let join = tokio::spawn(dispatcher.run());

        for _ in 0..3 {
            queue.put("tick", TaskArgs::new(), 0).unwrap();
        }
        while queue.unfinished() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.shutdown();
        join.await.unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(handle.stats().dispatched, 3);
    }
}
