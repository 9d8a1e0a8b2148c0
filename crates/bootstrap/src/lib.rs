//! Bootstrap Context
//!
//! Runtime facilities handed to a resource adapter: the shared work
//! manager, timers, transaction completion and synchronization, and the
//! context capability registry.

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod registry;
pub mod timer;
pub mod tsr;
pub mod xa;

pub use config::{BootstrapConfig, ConfigError};
pub use context::{BootstrapBuilder, BootstrapContext, RuntimeBootstrapContext};
pub use registry::ContextRegistry;
pub use timer::{Timer, TimerError, TimerFactory, UnavailableError};
pub use tsr::{
    InMemorySynchronizationRegistry, Resource, SyncRegistryError, Synchronization,
    TransactionStatus, TransactionSynchronizationRegistry,
};
pub use xa::{NoInflowXaTerminator, RecoverScan, Vote, XaError, XaTerminator};
