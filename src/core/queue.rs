//! Thread-safe priority queue of deferred task records.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::error::SchedulerError;
use crate::core::task::{TaskArgs, TaskRecord};

/// Common enqueue contract shared by the in-memory queue and the durable
/// backend adapter, so the two are interchangeable from the caller's side.
pub trait TaskSink: Send + Sync {
    /// Build a task record with a fresh sequence number and insert it.
    /// Returns the assigned sequence number.
    ///
    /// # Errors
    ///
    /// `SchedulerError::QueueFull` when a depth limit is configured and
    /// reached; backend errors for durable sinks.
    fn put(&self, event: &str, args: TaskArgs, priority: i64) -> Result<u64, SchedulerError>;
}

/// Wrapper giving `TaskRecord` the heap ordering: the record with the
/// lexicographically smallest `(priority, seq)` pair is yielded next.
/// `BinaryHeap` is a max-heap, so the comparison is reversed.
struct QueuedRecord(TaskRecord);

impl PartialEq for QueuedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for QueuedRecord {}

impl PartialOrd for QueuedRecord {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRecord {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .0
            .priority
            .cmp(&self.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Priority queue of [`TaskRecord`]s with an explicit `(priority, seq)`
/// tie-break rule.
///
/// `put` is non-blocking and, by default, unbounded; an optional depth limit
/// turns overflow into `QueueFull`. `mark_done` provides the completion
/// accounting any join/drain logic needs.
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedRecord>>,
    seq: AtomicU64,
    in_flight: AtomicUsize,
    max_depth: Option<usize>,
}

impl TaskQueue {
    /// Create an unbounded queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_depth: None,
        }
    }

    /// Create a queue that rejects enqueues beyond `max_depth`.
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(max_depth.min(1024))),
            seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_depth: Some(max_depth),
        }
    }

    /// Remove and return the lowest `(priority, seq)` record, or `None` when
    /// empty. The record counts as in-flight until `mark_done` is called.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<TaskRecord> {
        let mut heap = self.heap.lock();
        let popped = heap.pop().map(|q| q.0);
        if popped.is_some() {
            // Incremented while still holding the lock, so `unfinished`
            // never transiently under-counts a live record.
            self.in_flight.fetch_add(1, Ordering::AcqRel);
        }
        drop(heap);
        popped
    }

    /// Completion accounting hook: call once per dequeued record after all
    /// of its handlers finished.
    pub fn mark_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether the queue holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Queued plus in-flight records; zero means fully drained.
    #[must_use]
    pub fn unfinished(&self) -> usize {
        self.len() + self.in_flight.load(Ordering::Acquire)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSink for TaskQueue {
    fn put(&self, event: &str, args: TaskArgs, priority: i64) -> Result<u64, SchedulerError> {
        let mut heap = self.heap.lock();
        if let Some(max) = self.max_depth {
            if heap.len() >= max {
                return Err(SchedulerError::QueueFull("max queue depth reached".into()));
            }
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        heap.push(QueuedRecord(TaskRecord {
            event: event.to_owned(),
            args,
            priority,
            seq,
        }));
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_then_enqueue_order() {
        let q = TaskQueue::new();
        q.put("a", TaskArgs::new(), 5).unwrap();
        q.put("b", TaskArgs::new(), 1).unwrap();
        q.put("c", TaskArgs::new(), 1).unwrap();

        assert_eq!(q.try_dequeue().unwrap().event, "b");
        assert_eq!(q.try_dequeue().unwrap().event, "c");
        assert_eq!(q.try_dequeue().unwrap().event, "a");
        assert!(q.try_dequeue().is_none());
    }

    #[test]
    fn negative_priority_dequeues_first() {
        let q = TaskQueue::new();
        q.put("normal", TaskArgs::new(), 0).unwrap();
        q.put("urgent", TaskArgs::new(), -10).unwrap();
        assert_eq!(q.try_dequeue().unwrap().event, "urgent");
    }

    #[test]
    fn put_round_trips_args() {
        let q = TaskQueue::new();
        q.put("x", TaskArgs::new().arg(1).arg(2).kw("key", "v"), 0).unwrap();
        let record = q.try_dequeue().unwrap();
        assert_eq!(record.args.args, vec![serde_json::Value::from(1), serde_json::Value::from(2)]);
        assert_eq!(record.args.kwargs["key"], serde_json::Value::from("v"));
    }

    #[test]
    fn seq_is_monotonic() {
        let q = TaskQueue::new();
        let a = q.put("t", TaskArgs::new(), 0).unwrap();
        let b = q.put("t", TaskArgs::new(), 0).unwrap();
        assert!(b > a);
    }

    #[test]
    fn depth_limit_rejects_overflow() {
        let q = TaskQueue::with_max_depth(2);
        q.put("t", TaskArgs::new(), 0).unwrap();
        q.put("t", TaskArgs::new(), 0).unwrap();
        let err = q.put("t", TaskArgs::new(), 0).unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull(_)));
    }

    #[test]
    fn unfinished_tracks_in_flight_records() {
        let q = TaskQueue::new();
        q.put("t", TaskArgs::new(), 0).unwrap();
        q.put("t", TaskArgs::new(), 0).unwrap();
        assert_eq!(q.unfinished(), 2);

        let _record = q.try_dequeue().unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.unfinished(), 2);

        q.mark_done();
        assert_eq!(q.unfinished(), 1);
    }
}
