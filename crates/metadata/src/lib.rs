//! Connection Metadata
//!
//! Read-only descriptors of the backend a managed connection talks to.

#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod result_set;

pub use connection::{ManagedConnectionMetaData, StaticConnectionMetaData};
pub use error::ResourceError;
pub use result_set::{Concurrency, ResultSetInfo, ResultSetType, StaticResultSetInfo, Visibility};
