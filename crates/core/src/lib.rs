//! Connector runtime core types.
//!
//! Identifiers, timeout sentinels and the execution context shared by the
//! work manager, the bootstrap facilities and resource adapters.

#![warn(missing_docs)]

mod context;
mod id;
mod timeout;

pub use context::{
    ContextKind, ExecutionContext, Xid, XidError, MAX_BQUAL_SIZE, MAX_GTRID_SIZE, NULL_FORMAT_ID,
};
pub use id::{TimerId, WorkId};
pub use timeout::{NegativeTimeout, StartDelay, StartTimeout, IMMEDIATE, INDEFINITE, UNKNOWN};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
