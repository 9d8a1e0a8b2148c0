//! Descriptor errors.

use thiserror::Error;

/// Information could not be retrieved from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The descriptor's connection is gone
    #[error("could not retrieve information: connection detached")]
    Detached,

    /// The backend does not expose the requested information
    #[error("could not retrieve information: {0}")]
    Unavailable(String),

    /// A raw code did not map to a known value
    #[error("could not retrieve information: unknown {kind} code {code}")]
    UnknownCode {
        /// What was being decoded
        kind: &'static str,
        /// The raw value
        code: i32,
    },
}
