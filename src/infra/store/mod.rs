//! Durable store contract and shipped implementations.

pub mod jsonl;
pub mod memory;

use std::sync::Arc;

use crate::core::error::{AppResult, SchedulerError};
use crate::core::task::TaskRecord;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// What the store does to "perform" a task — typically a synchronous fan-out
/// over the host's registered handlers. Injected by the host because the
/// store itself has no knowledge of handlers.
pub type Performer = Arc<dyn Fn(TaskRecord) -> AppResult<()> + Send + Sync>;

/// The exact contract the durable backend adapter depends on: an external
/// persistent store exposing `put`, `get`, and `perform`. Redelivery
/// semantics, if any, belong to the store and are opaque to the adapter.
pub trait DurableStore: Send + Sync {
    /// Persist a task record.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Backend` on storage failure.
    fn put(&self, record: &TaskRecord) -> Result<(), SchedulerError>;

    /// Fetch the next pending record. With `block` set, wait until one is
    /// available; otherwise return `None` immediately when empty.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Backend` on storage failure.
    fn get(&self, block: bool) -> Result<Option<TaskRecord>, SchedulerError>;

    /// Execute the record.
    ///
    /// # Errors
    ///
    /// `SchedulerError::HandlerFailed` when the performer errors.
    fn perform(&self, record: TaskRecord) -> Result<(), SchedulerError>;
}

pub(crate) fn perform_with(performer: &Performer, record: TaskRecord) -> Result<(), SchedulerError> {
    let event = record.event.clone();
    performer(record).map_err(|source| SchedulerError::HandlerFailed { event, source })
}
