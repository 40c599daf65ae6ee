//! Builder assembling a [`Scheduler`] from configuration and optional parts.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SchedulerConfig;
use crate::core::audit::AuditSink;
use crate::core::dispatcher::SharedAudit;
use crate::core::error::SchedulerError;
use crate::infra::durable::DurableBackend;
use crate::infra::store::DurableStore;
use crate::runtime::scheduler::Scheduler;

/// Assembles a [`Scheduler`], validating configuration up front.
///
/// ```no_run
/// use taskhook::builders::SchedulerBuilder;
/// use taskhook::config::SchedulerConfig;
///
/// let scheduler = SchedulerBuilder::new(SchedulerConfig::default())
///     .build()
///     .unwrap();
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    audit: Option<SharedAudit>,
    store: Option<Arc<dyn DurableStore>>,
}

impl SchedulerBuilder {
    /// Start a builder from the given configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            audit: None,
            store: None,
        }
    }

    /// Record dispatch outcomes into `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(sink)));
        self
    }

    /// Route `put_durable` through `store` and run its records with a
    /// dedicated worker, polling at the configured interval.
    #[must_use]
    pub fn with_durable(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and assemble the scheduler.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Backend` when the configuration is invalid.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Backend(format!("config invalid: {e}")))?;

        let durable = self
            .store
            .map(|store| Arc::new(DurableBackend::new(store, self.config.poll_interval())));
        Ok(Scheduler::new(self.config, self.audit, durable))
    }
}
