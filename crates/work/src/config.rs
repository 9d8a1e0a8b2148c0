//! Work manager configuration.

use connector_core::ContextKind;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Configuration for [`crate::PooledWorkManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkManagerConfig {
    /// Max items running at once
    pub max_concurrent: NonZeroUsize,
    /// Max items accepted but waiting for a worker
    pub queue_capacity: usize,
    /// Context kinds propagated to work
    pub supported_contexts: Vec<ContextKind>,
    /// How long shutdown waits for running items, in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for WorkManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            queue_capacity: 256,
            supported_contexts: vec![ContextKind::Transaction, ContextKind::Hint],
            shutdown_grace_ms: 5_000,
        }
    }
}

impl WorkManagerConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent items.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the waiting queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Replace the supported context kinds.
    pub fn with_supported_contexts(mut self, kinds: impl IntoIterator<Item = ContextKind>) -> Self {
        self.supported_contexts = kinds.into_iter().collect();
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
