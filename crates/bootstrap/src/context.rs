//! Bootstrap context handed to a resource adapter at start.

use crate::config::BootstrapConfig;
use crate::registry::ContextRegistry;
use crate::timer::{Timer, TimerFactory, UnavailableError};
use crate::tsr::{InMemorySynchronizationRegistry, TransactionSynchronizationRegistry};
use crate::xa::{NoInflowXaTerminator, XaTerminator};
use connector_core::ContextKind;
use connector_work::{PooledWorkManager, WorkManager};
use std::sync::Arc;
use tracing::info;

/// Runtime facilities available to a resource adapter.
pub trait BootstrapContext: Send + Sync {
    /// Shared work manager.
    fn work_manager(&self) -> Arc<dyn WorkManager>;

    /// Completion of imported transactions.
    fn xa_terminator(&self) -> Arc<dyn XaTerminator>;

    /// A new timer, or an error the caller may retry.
    fn create_timer(&self) -> Result<Timer, UnavailableError>;

    /// Whether work submitted with this context kind is supported.
    fn is_context_supported(&self, kind: &ContextKind) -> bool;

    /// Per-transaction resources and synchronizations.
    fn transaction_synchronization_registry(&self) -> Arc<dyn TransactionSynchronizationRegistry>;
}

/// Builder for [`RuntimeBootstrapContext`].
pub struct BootstrapBuilder {
    config: BootstrapConfig,
    xa: Option<Arc<dyn XaTerminator>>,
    tsr: Option<Arc<dyn TransactionSynchronizationRegistry>>,
}

impl BootstrapBuilder {
    /// Use a transaction manager's terminator.
    pub fn with_xa_terminator(mut self, xa: Arc<dyn XaTerminator>) -> Self {
        self.xa = Some(xa);
        self
    }

    /// Use a custom synchronization registry.
    pub fn with_synchronization_registry(
        mut self,
        tsr: Arc<dyn TransactionSynchronizationRegistry>,
    ) -> Self {
        self.tsr = Some(tsr);
        self
    }

    /// Build the context and its work manager.
    pub fn build(self) -> RuntimeBootstrapContext {
        let registry = ContextRegistry::new(self.config.work.supported_contexts.iter().cloned());
        let work = PooledWorkManager::new(self.config.work.clone());

        info!(
            "Bootstrap context ready: {} workers, {} timers, contexts [{}]",
            self.config.work.max_concurrent,
            self.config.max_timers,
            registry
                .supported()
                .iter()
                .map(ContextKind::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        RuntimeBootstrapContext {
            work,
            xa: self.xa.unwrap_or_else(|| Arc::new(NoInflowXaTerminator)),
            tsr: self
                .tsr
                .unwrap_or_else(|| Arc::new(InMemorySynchronizationRegistry::new())),
            timers: TimerFactory::new(self.config.max_timers),
            registry,
            config: self.config,
        }
    }
}

/// [`BootstrapContext`] backed by a [`PooledWorkManager`].
pub struct RuntimeBootstrapContext {
    config: BootstrapConfig,
    work: PooledWorkManager,
    xa: Arc<dyn XaTerminator>,
    tsr: Arc<dyn TransactionSynchronizationRegistry>,
    timers: TimerFactory,
    registry: ContextRegistry,
}

impl RuntimeBootstrapContext {
    /// Build with the default terminator and registry.
    pub fn new(config: BootstrapConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a context.
    pub fn builder(config: BootstrapConfig) -> BootstrapBuilder {
        BootstrapBuilder {
            config,
            xa: None,
            tsr: None,
        }
    }

    /// Configuration the context was built from.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// The concrete work manager, for stats and shutdown.
    pub fn pooled_work_manager(&self) -> &PooledWorkManager {
        &self.work
    }

    /// Timers currently alive.
    pub fn timers_in_use(&self) -> usize {
        self.timers.in_use()
    }

    /// Supported context kinds, sorted.
    pub fn supported_contexts(&self) -> Vec<ContextKind> {
        self.registry.supported()
    }

    /// Cancel timers and shut the work manager down. Returns whether all
    /// running work finished within the grace period.
    pub async fn shutdown(&self) -> bool {
        self.timers.close();
        self.work.shutdown().await
    }
}

impl BootstrapContext for RuntimeBootstrapContext {
    fn work_manager(&self) -> Arc<dyn WorkManager> {
        Arc::new(self.work.clone())
    }

    fn xa_terminator(&self) -> Arc<dyn XaTerminator> {
        Arc::clone(&self.xa)
    }

    fn create_timer(&self) -> Result<Timer, UnavailableError> {
        self.timers.create()
    }

    fn is_context_supported(&self, kind: &ContextKind) -> bool {
        self.registry.is_supported(kind)
    }

    fn transaction_synchronization_registry(&self) -> Arc<dyn TransactionSynchronizationRegistry> {
        Arc::clone(&self.tsr)
    }
}

impl std::fmt::Debug for RuntimeBootstrapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBootstrapContext")
            .field("config", &self.config)
            .field("work", &self.work)
            .field("timers", &self.timers)
            .field("registry", &self.registry)
            .finish()
    }
}
