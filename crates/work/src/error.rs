//! Failures surfaced at the work manager boundary.
//!
//! Two families exist: rejections (the item never ran; resubmission may
//! succeed) and completion failures (the item started and its context setup
//! or its own logic failed). Completion failures always wrap the cause.

use connector_core::{ContextKind, WorkId, Xid};
use std::time::Duration;

/// Numeric error codes shared with resource adapters.
pub mod codes {
    /// Undefined error
    pub const UNDEFINED: i32 = -1;
    /// Internal runtime error
    pub const INTERNAL: i32 = 0;
    /// Start timeout expired
    pub const START_TIMED_OUT: i32 = 1;
    /// Nested transactions are not supported
    pub const TX_NESTED_NOT_SUPPORTED: i32 = 2;
    /// Concurrent work within one transaction is disallowed
    pub const TX_CONCURRENT_WORK_DISALLOWED: i32 = 3;
    /// The imported transaction could not be recreated
    pub const TX_RECREATE_FAILED: i32 = 4;
}

/// Why a work item was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// Not started within its start timeout
    #[error("start timed out")]
    StartTimedOut,

    /// Too many items are waiting to start
    #[error("queue is full ({0} items waiting)")]
    Capacity(usize),

    /// The work manager is shutting down
    #[error("work manager is shutting down")]
    ShuttingDown,

    /// Released by request before it started
    #[error("released before start")]
    Released,

    /// Other internal cause
    #[error("internal error: {0}")]
    Internal(String),
}

impl RejectReason {
    /// Numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            RejectReason::StartTimedOut => codes::START_TIMED_OUT,
            RejectReason::Released => codes::UNDEFINED,
            RejectReason::Capacity(_) | RejectReason::ShuttingDown | RejectReason::Internal(_) => {
                codes::INTERNAL
            }
        }
    }
}

/// The execution context of a started item could not be established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextSetupError {
    /// The runtime does not propagate this kind of context
    #[error("context kind '{0}' is not supported")]
    UnsupportedContext(ContextKind),

    /// Another item is already running under the same transaction
    #[error("transaction {0} already has work in progress")]
    ConcurrentWorkDisallowed(Xid),
}

impl ContextSetupError {
    /// Numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            ContextSetupError::UnsupportedContext(ContextKind::Transaction) => {
                codes::TX_RECREATE_FAILED
            }
            ContextSetupError::UnsupportedContext(_) => codes::INTERNAL,
            ContextSetupError::ConcurrentWorkDisallowed(_) => codes::TX_CONCURRENT_WORK_DISALLOWED,
        }
    }
}

/// Cause of a completion failure.
#[derive(Debug, thiserror::Error)]
pub enum CompletionFailure {
    /// Execution context setup failed before `run` was invoked
    #[error("execution context setup failed: {0}")]
    ContextSetup(#[source] ContextSetupError),

    /// `run` returned an error
    #[error("work failed: {0}")]
    Run(#[source] anyhow::Error),

    /// `run` panicked
    #[error("work panicked: {0}")]
    Panicked(String),

    /// `run` outlived the transaction timeout and was released
    #[error("work exceeded transaction timeout of {0:?}")]
    TransactionTimedOut(Duration),

    /// The task running the item was cancelled by the runtime
    #[error("work task aborted")]
    Aborted,
}

impl CompletionFailure {
    /// Numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            CompletionFailure::ContextSetup(e) => e.code(),
            CompletionFailure::Run(_) | CompletionFailure::Panicked(_) => codes::UNDEFINED,
            CompletionFailure::TransactionTimedOut(_) | CompletionFailure::Aborted => codes::INTERNAL,
        }
    }
}

/// Error returned by work submission.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// The item was not accepted, or was accepted but never started
    #[error("work {id} rejected: {reason}")]
    Rejected {
        /// Item identifier
        id: WorkId,
        /// Rejection cause
        reason: RejectReason,
    },

    /// The item started and completed with a failure
    #[error("work {id} completed with failure: {failure}")]
    Completed {
        /// Item identifier
        id: WorkId,
        /// Wrapped cause
        #[source]
        failure: CompletionFailure,
    },
}

impl WorkError {
    /// Identifier of the affected item.
    pub fn work_id(&self) -> WorkId {
        match self {
            WorkError::Rejected { id, .. } | WorkError::Completed { id, .. } => *id,
        }
    }

    /// Numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            WorkError::Rejected { reason, .. } => reason.code(),
            WorkError::Completed { failure, .. } => failure.code(),
        }
    }

    /// Whether this is a rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self, WorkError::Rejected { .. })
    }

    /// Whether this is the timeout flavor of rejection.
    pub fn is_start_timeout(&self) -> bool {
        matches!(
            self,
            WorkError::Rejected {
                reason: RejectReason::StartTimedOut,
                ..
            }
        )
    }

    /// Rejection cause, if rejected.
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            WorkError::Rejected { reason, .. } => Some(reason),
            WorkError::Completed { .. } => None,
        }
    }

    /// Completion cause, if the item ran.
    pub fn completion_failure(&self) -> Option<&CompletionFailure> {
        match self {
            WorkError::Completed { failure, .. } => Some(failure),
            WorkError::Rejected { .. } => None,
        }
    }
}
