//! Scheduler configuration structure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_THREAD_WORKER: usize = 16;
const DEFAULT_POLL_INTERVAL_MS: u64 = 300;
const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Runtime configuration for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker pool threads for blocking handlers. `0` means one
    /// per CPU.
    pub max_thread_worker: usize,
    /// Sleep between empty queue polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Optional queue depth limit; `None` keeps the queue unbounded.
    pub max_queue_depth: Option<usize>,
    /// Stack size for worker pool threads, in bytes.
    pub thread_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_thread_worker: DEFAULT_MAX_THREAD_WORKER,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_queue_depth: None,
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A human-readable message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.max_queue_depth == Some(0) {
            return Err("max_queue_depth must be greater than 0 when set".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure as a message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment (after a best-effort
    /// `.env` load), starting from defaults. Recognized variables:
    /// `TASKHOOK_MAX_THREAD_WORKER`, `TASKHOOK_POLL_INTERVAL_MS`,
    /// `TASKHOOK_MAX_QUEUE_DEPTH`, `TASKHOOK_THREAD_STACK_SIZE`.
    ///
    /// # Errors
    ///
    /// A message naming the variable that failed to parse, or validation
    /// failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(v) = read_env("TASKHOOK_MAX_THREAD_WORKER")? {
            cfg.max_thread_worker = v;
        }
        if let Some(v) = read_env("TASKHOOK_POLL_INTERVAL_MS")? {
            cfg.poll_interval_ms = v;
        }
        if let Some(v) = read_env("TASKHOOK_MAX_QUEUE_DEPTH")? {
            cfg.max_queue_depth = Some(v);
        }
        if let Some(v) = read_env("TASKHOOK_THREAD_STACK_SIZE")? {
            cfg.thread_stack_size = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Effective worker count: `max_thread_worker`, or one per CPU when `0`.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.max_thread_worker == 0 {
            num_cpus::get()
        } else {
            self.max_thread_worker
        }
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid value for {name}: `{raw}`")),
        Err(_) => Ok(None),
    }
}
