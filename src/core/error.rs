//! Error types for scheduler components.

use thiserror::Error;

/// Errors produced by the registry, queue, dispatcher, pool, and backends.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Detach was attempted for a handler that is not attached to the event.
    #[error("handler not attached to event `{0}`")]
    HandlerNotFound(String),
    /// A task was dequeued but no handler is registered for its event.
    #[error("no handler registered for task `{0}`")]
    NoHandlerForTask(String),
    /// A handler returned an error during emit or task dispatch.
    #[error("handler for event `{event}` failed: {source}")]
    HandlerFailed {
        /// Event the failing handler is attached to.
        event: String,
        /// Underlying handler error.
        #[source]
        source: anyhow::Error,
    },
    /// A blocking handler panicked inside the worker pool.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),
    /// Enqueue rejected because the configured depth limit was reached.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// The worker pool has been shut down.
    #[error("worker pool has shut down")]
    PoolShutdown,
    /// Start was requested while the dispatcher is already running.
    #[error("scheduler is already running")]
    AlreadyRunning,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Handler-facing result using anyhow for application contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
