//! In-memory durable store for development and tests.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::core::error::SchedulerError;
use crate::core::task::TaskRecord;

use super::{perform_with, DurableStore, Performer};

/// FIFO store kept entirely in memory. Not actually durable; it exists so
/// adapter behavior can be exercised without touching disk.
pub struct MemoryStore {
    records: Mutex<VecDeque<TaskRecord>>,
    available: Condvar,
    performer: Performer,
}

impl MemoryStore {
    /// Create a store with the given performer.
    #[must_use]
    pub fn new(performer: Performer) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            performer,
        }
    }

    /// Number of pending records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no records are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, record: &TaskRecord) -> Result<(), SchedulerError> {
        self.records.lock().push_back(record.clone());
        self.available.notify_one();
        Ok(())
    }

    fn get(&self, block: bool) -> Result<Option<TaskRecord>, SchedulerError> {
        let mut records = self.records.lock();
        if block {
            while records.is_empty() {
                self.available.wait(&mut records);
            }
        }
        Ok(records.pop_front())
    }

    fn perform(&self, record: TaskRecord) -> Result<(), SchedulerError> {
        perform_with(&self.performer, record)
    }
}
