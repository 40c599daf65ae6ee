//! File-backed durable store using JSON lines.
//!
//! Each `put` appends one line; `get` pops the front and rewrites the file.
//! Pending records are reloaded on open, which is what makes tasks survive a
//! process restart.

use std::collections::VecDeque;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::error::SchedulerError;
use crate::core::task::TaskRecord;

use super::{perform_with, DurableStore, Performer};

const BLOCKING_GET_POLL: Duration = Duration::from_millis(25);

/// Crash-survivable FIFO store persisting records as JSON lines under a
/// directory, one file per stream.
pub struct JsonlStore {
    path: PathBuf,
    stream: String,
    records: Mutex<VecDeque<TaskRecord>>,
    performer: Performer,
}

impl JsonlStore {
    /// Open or create the store, reloading any records left pending by a
    /// previous process.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Backend` on I/O or deserialization failure.
    pub fn open(
        path: impl AsRef<Path>,
        stream: impl Into<String>,
        performer: Performer,
    ) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(&path).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let store = Self {
            path,
            stream: stream.into(),
            records: Mutex::new(VecDeque::new()),
            performer,
        };
        store.load_from_disk()?;
        Ok(store)
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

    fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.jsonl", self.stream))
    }

    fn load_from_disk(&self) -> Result<(), SchedulerError> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .open(&file_path)
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let reader = BufReader::new(file);
        let mut records = self.records.lock();
        for line in reader.lines() {
            let line = line.map_err(|e| SchedulerError::Backend(e.to_string()))?;
            let record: TaskRecord =
                serde_json::from_str(&line).map_err(|e| SchedulerError::Backend(e.to_string()))?;
            records.push_back(record);
        }
        Ok(())
    }

    fn append_to_disk(&self, record: &TaskRecord) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        let line =
            serde_json::to_string(record).map_err(|e| SchedulerError::Backend(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| SchedulerError::Backend(e.to_string()))
    }

    fn rewrite_disk(&self, records: &VecDeque<TaskRecord>) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.file_path())
            .map_err(|e| SchedulerError::Backend(e.to_string()))?;
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| SchedulerError::Backend(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| SchedulerError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

impl DurableStore for JsonlStore {
    fn put(&self, record: &TaskRecord) -> Result<(), SchedulerError> {
        let mut records = self.records.lock();
        // Disk first: a record must never be dequeueable unless it would
        // also survive a restart.
        self.append_to_disk(record)?;
        records.push_back(record.clone());
        Ok(())
    }

    fn get(&self, block: bool) -> Result<Option<TaskRecord>, SchedulerError> {
        loop {
            {
                let mut records = self.records.lock();
                if let Some(record) = records.pop_front() {
                    self.rewrite_disk(&records)?;
                    return Ok(Some(record));
                }
            }
            if !block {
                return Ok(None);
            }
            std::thread::sleep(BLOCKING_GET_POLL);
        }
    }

    fn perform(&self, record: TaskRecord) -> Result<(), SchedulerError> {
        perform_with(&self.performer, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskArgs;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("taskhook-jsonl-{tag}-{}", std::process::id()))
    }

    fn record(seq: u64) -> TaskRecord {
        TaskRecord {
            event: "persisted".into(),
            args: TaskArgs::new().arg(seq).kw("k", "v"),
            priority: 0,
            seq,
        }
    }

    fn noop_performer() -> Performer {
        Arc::new(|_| Ok(()))
    }

    #[test]
    fn put_get_round_trip() {
        let dir = temp_dir("roundtrip");
        let _ = std::fs::remove_dir_all(&dir);
        let store = JsonlStore::open(&dir, "tasks", noop_performer()).unwrap();

        store.put(&record(1)).unwrap();
        store.put(&record(2)).unwrap();

        let first = store.get(false).unwrap().unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.args.kwargs["k"], serde_json::Value::from("v"));
        assert_eq!(store.get(false).unwrap().unwrap().seq, 2);
        assert!(store.get(false).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pending_records_survive_reopen() {
        let dir = temp_dir("reopen");
        let _ = std::fs::remove_dir_all(&dir);
        {
            let store = JsonlStore::open(&dir, "tasks", noop_performer()).unwrap();
            store.put(&record(7)).unwrap();
            store.put(&record(8)).unwrap();
            // consume one; the other must survive the "crash"
            store.get(false).unwrap().unwrap();
        }
        let reopened = JsonlStore::open(&dir, "tasks", noop_performer()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(false).unwrap().unwrap().seq, 8);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_append_keeps_the_record_out_of_memory() {
        let dir = temp_dir("badappend");
        let _ = std::fs::remove_dir_all(&dir);
        let store = JsonlStore::open(&dir, "tasks", noop_performer()).unwrap();

        // A directory squatting on the stream file makes the append fail.
        std::fs::create_dir_all(dir.join("tasks.jsonl")).unwrap();
        let err = store.put(&record(1)).unwrap_err();
        assert!(matches!(err, SchedulerError::Backend(_)));

        // The rejected record must not be dequeueable either.
        assert!(store.is_empty());
        assert!(store.get(false).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn streams_are_isolated() {
        let dir = temp_dir("streams");
        let _ = std::fs::remove_dir_all(&dir);
        let a = JsonlStore::open(&dir, "a", noop_performer()).unwrap();
        let b = JsonlStore::open(&dir, "b", noop_performer()).unwrap();
        a.put(&record(1)).unwrap();
        assert!(b.is_empty());
        assert_eq!(a.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
