//! Scheduler facade tying the registry, queue, pool, and dispatcher together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::core::dispatcher::{DispatchStats, Dispatcher, DispatcherHandle, SharedAudit};
use crate::core::error::SchedulerError;
use crate::core::event::{EventRegistry, Handler, Subscription};
use crate::core::queue::{TaskQueue, TaskSink};
use crate::core::task::TaskArgs;
use crate::core::worker_pool::{PoolStats, WorkerPool};
use crate::infra::durable::DurableBackend;
use crate::runtime::spawn::Spawn;

/// Well-known lifecycle event names emitted by the scheduler.
///
/// Attach handlers to these like any other event to observe startup and
/// shutdown phases.
pub mod lifecycle {
    /// Emitted by [`super::Scheduler::init`] before anything else.
    pub const CONFIG: &str = "config";
    /// Emitted by [`super::Scheduler::init`] after `config`.
    pub const INIT: &str = "init";
    /// Emitted by [`super::Scheduler::init`] last.
    pub const AFTER_INIT: &str = "after_init";
    /// Emitted by [`super::Scheduler::start`] before the loop spawns.
    pub const START: &str = "start";
    /// Emitted by [`super::Scheduler::shutdown`] before teardown.
    pub const STOP: &str = "stop";
}

/// Combined snapshot of the scheduler's moving parts.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    /// Dispatcher counters, present once the scheduler has started.
    pub dispatch: Option<DispatchStats>,
    /// Worker pool counters.
    pub pool: PoolStats,
    /// Records currently waiting in the queue.
    pub queued: usize,
    /// Records enqueued but not yet marked done.
    pub unfinished: usize,
}

/// In-process deferred-work scheduler.
///
/// Owns the handler registry, the priority task queue, the blocking worker
/// pool, and (once started) the dispatcher loop. Constructed through
/// [`crate::builders::SchedulerBuilder`].
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<EventRegistry>,
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    audit: Option<SharedAudit>,
    durable: Option<Arc<DurableBackend>>,
    handle: Mutex<Option<DispatcherHandle>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub(crate) fn new(
        config: SchedulerConfig,
        audit: Option<SharedAudit>,
        durable: Option<Arc<DurableBackend>>,
    ) -> Self {
        let queue = match config.max_queue_depth {
            Some(depth) => Arc::new(TaskQueue::with_max_depth(depth)),
            None => Arc::new(TaskQueue::new()),
        };
        let pool = Arc::new(WorkerPool::new(
            config.worker_count(),
            config.thread_stack_size,
        ));
        Self {
            config,
            registry: Arc::new(EventRegistry::new()),
            queue,
            pool,
            audit,
            durable,
            handle: Mutex::new(None),
        }
    }

    /// The handler registry, for direct attach/detach/emit access.
    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// The in-memory priority queue behind [`Scheduler::put`].
    #[must_use]
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Attach `handler` to `event` at the given priority. Lower priority
    /// values run first; equal priorities run in attach order.
    pub fn on(&self, event: &str, priority: i64, handler: Handler) {
        self.registry.attach(event, handler, priority);
    }

    /// Detach a previously attached handler.
    ///
    /// # Errors
    ///
    /// `SchedulerError::HandlerNotFound` when the handler is not attached.
    pub fn detach(&self, event: &str, handler: &Handler) -> Result<(), SchedulerError> {
        self.registry.detach(event, handler)
    }

    /// Attach `handlers` to `event` for the lifetime of the returned guard.
    #[must_use]
    pub fn subscribe(&self, event: &str, handlers: Vec<Handler>) -> Subscription<'_> {
        self.registry.subscribe(event, handlers)
    }

    /// Run every handler attached to `event` in place, lowest priority
    /// value first, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first handler failure as `SchedulerError::HandlerFailed`.
    pub async fn emit(&self, event: &str, args: &TaskArgs) -> Result<(), SchedulerError> {
        self.registry.emit(event, args).await
    }

    /// Enqueue a deferred task for the dispatcher. Returns the record's
    /// sequence number.
    ///
    /// # Errors
    ///
    /// `SchedulerError::QueueFull` when a depth limit is configured and hit.
    pub fn put(&self, event: &str, args: TaskArgs, priority: i64) -> Result<u64, SchedulerError> {
        self.queue.put(event, args, priority)
    }

    /// Enqueue a task through the durable backend instead of the in-memory
    /// queue. The record survives process restarts; the backend's worker
    /// performs it.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Backend` when no durable backend is configured or
    /// the store rejects the write.
    pub fn put_durable(
        &self,
        event: &str,
        args: TaskArgs,
        priority: i64,
    ) -> Result<u64, SchedulerError> {
        let backend = self
            .durable
            .as_ref()
            .ok_or_else(|| SchedulerError::Backend("no durable backend configured".into()))?;
        backend.put(event, args, priority)
    }

    /// Emit the setup lifecycle events in order: `config`, `init`,
    /// `after_init`.
    ///
    /// # Errors
    ///
    /// Propagates the first lifecycle handler failure.
    pub async fn init(&self) -> Result<(), SchedulerError> {
        for event in [lifecycle::CONFIG, lifecycle::INIT, lifecycle::AFTER_INIT] {
            self.registry.emit(event, &TaskArgs::new()).await?;
        }
        Ok(())
    }

    /// Emit `start`, spawn the dispatcher loop on `spawner`, and start the
    /// durable backend worker when one is configured.
    ///
    /// # Errors
    ///
    /// `SchedulerError::AlreadyRunning` if the loop is already live, or the
    /// first `start` handler failure.
    pub async fn start<S: Spawn>(&self, spawner: &S) -> Result<(), SchedulerError> {
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            Arc::clone(&self.pool),
            self.config.poll_interval(),
        );
        if let Some(audit) = &self.audit {
            dispatcher = dispatcher.with_audit(Arc::clone(audit));
        }

        // Install the handle before the first await: it doubles as the
        // running-claim, so a concurrent start fails here instead of
        // spawning a second consumer loop on the same queue.
        {
            let mut handle = self.handle.lock();
            if handle.as_ref().is_some_and(|h| !h.is_shutdown()) {
                return Err(SchedulerError::AlreadyRunning);
            }
            *handle = Some(dispatcher.handle());
        }

        if let Err(err) = self.registry.emit(lifecycle::START, &TaskArgs::new()).await {
            *self.handle.lock() = None;
            return Err(err);
        }
        spawner.spawn(dispatcher.run());

        if let Some(durable) = &self.durable {
            durable.start();
        }
        info!(
            workers = self.config.worker_count(),
            poll_interval_ms = self.config.poll_interval_ms,
            "scheduler started"
        );
        Ok(())
    }

    /// Emit `stop`, then stop the dispatcher, the durable worker, and the
    /// worker pool. Failures in `stop` handlers are logged, not propagated,
    /// so teardown always completes.
    ///
    /// The worker joins happen on the blocking thread pool; the scheduling
    /// task stays responsive while the backlog drains.
    pub async fn shutdown(&self) {
        if let Err(err) = self.registry.emit(lifecycle::STOP, &TaskArgs::new()).await {
            warn!(error = %err, "stop handler failed");
        }
        if let Some(handle) = self.handle.lock().take() {
            handle.shutdown();
        }
        let pool = Arc::clone(&self.pool);
        let durable = self.durable.clone();
        let joined = tokio::task::spawn_blocking(move || {
            if let Some(durable) = durable {
                durable.shutdown();
            }
            pool.shutdown();
        })
        .await;
        if joined.is_err() {
            warn!("teardown task panicked");
        }
        info!("scheduler stopped");
    }

    /// Wait until every enqueued record has been dispatched and marked
    /// done. Polls at a fraction of the configured interval.
    pub async fn drain(&self) {
        let pause = Duration::from_millis((self.config.poll_interval_ms / 4).max(1));
        while self.queue.unfinished() > 0 {
            tokio::time::sleep(pause).await;
        }
    }

    /// Snapshot of dispatcher, pool, and queue counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            dispatch: self.handle.lock().as_ref().map(DispatcherHandle::stats),
            pool: self.pool.stats(),
            queued: self.queue.len(),
            unfinished: self.queue.unfinished(),
        }
    }
}
