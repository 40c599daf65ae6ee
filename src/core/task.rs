//! Task records and the argument container passed to handlers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments carried by a task: an ordered sequence of opaque positional
/// values plus a string-keyed mapping. Values are `serde_json::Value` so
/// records can round-trip through durable stores unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Positional arguments, in call order.
    pub args: Vec<Value>,
    /// Keyword arguments; keys are unique.
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    /// Empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument, replacing any previous value for the key.
    #[must_use]
    pub fn kw(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// The unit of deferred work held in the priority queue.
///
/// Lower `priority` dequeues first; `seq` is assigned monotonically at
/// enqueue and breaks ties, so the queue yields records in strict
/// `(priority, seq)` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Name of the event whose handlers consume this task.
    pub event: String,
    /// Positional and keyword arguments passed to every handler.
    pub args: TaskArgs,
    /// Ordering weight; lower runs first.
    pub priority: i64,
    /// Enqueue sequence number, monotonic per queue.
    pub seq: u64,
}
