//! Core scheduling components: registry, queue, dispatcher, worker pool.

pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod queue;
pub mod task;
pub mod worker_pool;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use dispatcher::{
    DispatchReport, DispatchStats, Dispatcher, DispatcherHandle, DispatcherState, SharedAudit,
};
pub use error::{AppResult, SchedulerError};
pub use event::{EventRegistry, Handler, HandlerKind, Subscription};
pub use queue::{TaskQueue, TaskSink};
pub use task::{TaskArgs, TaskRecord};
pub use worker_pool::{PoolStats, PoolTicket, WorkerPool};
