//! Named event registry: handler storage, fan-out, and scoped subscription.
//!
//! Events are created on first reference and live for the process. Each event
//! owns an ordered handler list, sorted ascending by priority with ties broken
//! by registration order. The registry is an explicit object passed through
//! the application context; there is no global table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::core::error::{AppResult, SchedulerError};
use crate::core::task::TaskArgs;

/// Execution kind of a handler, chosen explicitly at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Runs on the scheduling task and may suspend at its own await points.
    Cooperative,
    /// Must be submitted to the worker pool; never runs on the scheduling task.
    Blocking,
}

type CooperativeFn =
    dyn Fn(TaskArgs) -> Pin<Box<dyn Future<Output = AppResult<()>> + Send>> + Send + Sync;
type BlockingFn = dyn Fn(TaskArgs) -> AppResult<()> + Send + Sync;

enum Callable {
    Cooperative(Arc<CooperativeFn>),
    Blocking(Arc<BlockingFn>),
}

impl Clone for Callable {
    fn clone(&self) -> Self {
        match self {
            Self::Cooperative(f) => Self::Cooperative(Arc::clone(f)),
            Self::Blocking(f) => Self::Blocking(Arc::clone(f)),
        }
    }
}

static HANDLER_IDS: AtomicU64 = AtomicU64::new(0);

/// A registered callable tagged with its execution kind.
///
/// The handle is cheap to clone; clones share identity, which is what
/// `detach` matches on. Attaching the same handle twice is allowed and
/// results in two list entries.
#[derive(Clone)]
pub struct Handler {
    id: u64,
    callable: Callable,
}

impl Handler {
    /// Wrap an async function as a cooperative handler.
    pub fn cooperative<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        Self {
            id: HANDLER_IDS.fetch_add(1, Ordering::Relaxed),
            callable: Callable::Cooperative(Arc::new(move |args| Box::pin(f(args)))),
        }
    }

    /// Wrap a synchronous function as a blocking handler.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(TaskArgs) -> AppResult<()> + Send + Sync + 'static,
    {
        Self {
            id: HANDLER_IDS.fetch_add(1, Ordering::Relaxed),
            callable: Callable::Blocking(Arc::new(f)),
        }
    }

    /// The execution kind this handler was tagged with.
    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        match self.callable {
            Callable::Cooperative(_) => HandlerKind::Cooperative,
            Callable::Blocking(_) => HandlerKind::Blocking,
        }
    }

    /// The blocking callable, if this is a blocking handler. Used by the
    /// dispatcher to ship the call to the worker pool.
    pub(crate) fn as_blocking(&self) -> Option<Arc<BlockingFn>> {
        match &self.callable {
            Callable::Blocking(f) => Some(Arc::clone(f)),
            Callable::Cooperative(_) => None,
        }
    }

    /// Invoke the handler on the calling task. Cooperative handlers are
    /// awaited; blocking handlers run inline, so this is only appropriate
    /// for lifecycle broadcast outside the dispatcher.
    pub async fn invoke_inline(&self, args: TaskArgs) -> AppResult<()> {
        match &self.callable {
            Callable::Cooperative(f) => f(args).await,
            Callable::Blocking(f) => f(args),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .finish()
    }
}

/// One entry in an event's handler list.
struct Registered {
    handler: Handler,
    priority: i64,
    /// Registration order within the event, for stable priority ties.
    order: u64,
}

/// A named event owning its ordered handler list.
#[derive(Default)]
struct Event {
    entries: Vec<Registered>,
    next_order: u64,
}

impl Event {
    /// Insert keeping ascending priority, stable by registration order.
    fn attach(&mut self, handler: Handler, priority: i64) {
        let order = self.next_order;
        self.next_order += 1;
        let at = self
            .entries
            .iter()
            .rposition(|r| r.priority <= priority)
            .map_or(0, |i| i + 1);
        self.entries.insert(
            at,
            Registered {
                handler,
                priority,
                order,
            },
        );
        debug_assert!(self
            .entries
            .windows(2)
            .all(|w| (w[0].priority, w[0].order) < (w[1].priority, w[1].order)));
    }

    /// Remove the first entry with matching handler identity.
    fn detach(&mut self, handler: &Handler) -> bool {
        match self.entries.iter().position(|r| r.handler.id == handler.id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }
}

/// Process-wide table of named handler lists.
///
/// Used both for lifecycle hooks (`emit`) and as the task-dispatch lookup
/// table. Attach/detach are safe at any time; the dispatcher acts on the
/// snapshot taken when a record is dequeued.
#[derive(Default)]
pub struct EventRegistry {
    events: RwLock<HashMap<String, Event>>,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to the named event with the given priority weight.
    /// Lower priorities fire first; equal priorities keep registration order.
    /// No uniqueness check is applied.
    pub fn attach(&self, event: &str, handler: Handler, priority: i64) {
        let mut events = self.events.write();
        events.entry(event.to_owned()).or_default().attach(handler, priority);
    }

    /// Remove the first matching attachment of `handler` from the named event.
    ///
    /// # Errors
    ///
    /// `SchedulerError::HandlerNotFound` if the handler is not attached.
    pub fn detach(&self, event: &str, handler: &Handler) -> Result<(), SchedulerError> {
        let mut events = self.events.write();
        let found = events.get_mut(event).is_some_and(|e| e.detach(handler));
        if found {
            Ok(())
        } else {
            Err(SchedulerError::HandlerNotFound(event.to_owned()))
        }
    }

    /// Snapshot of the named event's handlers, in firing order. Empty if the
    /// event has never been referenced.
    #[must_use]
    pub fn handlers(&self, event: &str) -> Vec<Handler> {
        let events = self.events.read();
        events
            .get(event)
            .map(|e| e.entries.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    /// Synchronously invoke every handler for the event, in list order,
    /// passing `args` through untyped. The first handler failure propagates
    /// to the caller; an event with no handlers is a no-op.
    ///
    /// Blocking handlers run inline here: emit is lifecycle broadcast, not
    /// queued dispatch, and happens on the caller's thread.
    ///
    /// # Errors
    ///
    /// `SchedulerError::HandlerFailed` wrapping the first handler error.
    pub async fn emit(&self, event: &str, args: &TaskArgs) -> Result<(), SchedulerError> {
        // Snapshot before awaiting so no lock is held across suspension.
        let snapshot = self.handlers(event);
        for handler in snapshot {
            handler
                .invoke_inline(args.clone())
                .await
                .map_err(|source| SchedulerError::HandlerFailed {
                    event: event.to_owned(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Scoped acquisition: attach each handler now (priority 0), detach all
    /// of them when the returned guard drops — on normal exit, early return,
    /// or unwind.
    pub fn subscribe(&self, event: &str, handlers: Vec<Handler>) -> Subscription<'_> {
        for handler in &handlers {
            self.attach(event, handler.clone(), 0);
        }
        Subscription {
            registry: self,
            event: event.to_owned(),
            handlers,
        }
    }
}

/// RAII guard for a scoped subscription; detaches its handlers on drop.
pub struct Subscription<'a> {
    registry: &'a EventRegistry,
    event: String,
    handlers: Vec<Handler>,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        for handler in &self.handlers {
            if let Err(err) = self.registry.detach(&self.event, handler) {
                warn!(event = %self.event, error = %err, "scoped handler already detached");
            }
        }
    }
}
