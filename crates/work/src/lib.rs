//! Work Management
//!
//! Work submission, lifecycle tracking and execution context propagation
//! for resource adapters.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod manager;
pub mod scope;
pub mod stats;
pub mod work;

pub use config::WorkManagerConfig;
pub use error::{codes, CompletionFailure, ContextSetupError, RejectReason, WorkError};
pub use lifecycle::{InvalidTransition, WorkState};
pub use listener::{
    ChannelListener, EventRecord, RecordingListener, WorkEvent, WorkEventKind, WorkListener,
};
pub use manager::{PooledWorkManager, SubmitOptions, WorkManager};
pub use scope::{current_context, current_xid};
pub use stats::WorkStats;
pub use work::{work_fn, FnWork, RunContext, Work};
