//! Completion of imported transactions.

use async_trait::async_trait;
use connector_core::Xid;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// XA return and error codes.
pub mod codes {
    /// Prepared and ready to commit
    pub const XA_OK: i32 = 0;
    /// Read-only branch, already committed
    pub const XA_RDONLY: i32 = 3;
    /// Branch was rolled back
    pub const XA_RBROLLBACK: i32 = 100;
    /// Resource manager error
    pub const XAER_RMERR: i32 = -3;
    /// Unknown Xid
    pub const XAER_NOTA: i32 = -4;
    /// Invalid arguments
    pub const XAER_INVAL: i32 = -5;
    /// Routine invoked in an improper context
    pub const XAER_PROTO: i32 = -6;

    /// Start a recovery scan
    pub const TMSTARTRSCAN: i32 = 0x0100_0000;
    /// End a recovery scan
    pub const TMENDRSCAN: i32 = 0x0080_0000;
    /// No flags
    pub const TMNOFLAGS: i32 = 0;
}

/// Outcome of a successful prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    /// Ready to commit
    Ok,
    /// Nothing to commit; the branch is finished
    ReadOnly,
}

impl Vote {
    /// XA return code.
    pub fn code(self) -> i32 {
        match self {
            Vote::Ok => codes::XA_OK,
            Vote::ReadOnly => codes::XA_RDONLY,
        }
    }
}

/// Recovery scan flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverScan {
    /// Start a scan
    Start,
    /// Continue a scan
    #[default]
    Continue,
    /// End a scan
    End,
    /// Start and end in one call
    StartEnd,
}

impl RecoverScan {
    /// XA flag word.
    pub fn flags(self) -> i32 {
        match self {
            RecoverScan::Start => codes::TMSTARTRSCAN,
            RecoverScan::Continue => codes::TMNOFLAGS,
            RecoverScan::End => codes::TMENDRSCAN,
            RecoverScan::StartEnd => codes::TMSTARTRSCAN | codes::TMENDRSCAN,
        }
    }

    /// Parse an XA flag word.
    pub fn from_flags(flags: i32) -> Result<Self, XaError> {
        match flags {
            codes::TMSTARTRSCAN => Ok(RecoverScan::Start),
            codes::TMNOFLAGS => Ok(RecoverScan::Continue),
            codes::TMENDRSCAN => Ok(RecoverScan::End),
            f if f == codes::TMSTARTRSCAN | codes::TMENDRSCAN => Ok(RecoverScan::StartEnd),
            other => Err(XaError::InvalidArgument(format!(
                "unknown recover flags {:#x}",
                other
            ))),
        }
    }
}

/// Transaction completion failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XaError {
    /// The branch was rolled back instead of committed
    #[error("transaction {0} was rolled back")]
    RolledBack(Xid),

    /// Resource manager failure
    #[error("resource manager error: {0}")]
    ResourceManager(String),

    /// No such transaction branch
    #[error("unknown transaction {0}")]
    UnknownXid(Xid),

    /// Invalid arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Called in a state that does not allow it
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl XaError {
    /// XA error code.
    pub fn code(&self) -> i32 {
        match self {
            XaError::RolledBack(_) => codes::XA_RBROLLBACK,
            XaError::ResourceManager(_) => codes::XAER_RMERR,
            XaError::UnknownXid(_) => codes::XAER_NOTA,
            XaError::InvalidArgument(_) => codes::XAER_INVAL,
            XaError::Protocol(_) => codes::XAER_PROTO,
        }
    }
}

/// Lets an adapter drive completion of transactions it imported.
#[async_trait]
pub trait XaTerminator: Send + Sync {
    /// Commit a branch. `one_phase` skips prepare.
    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError>;

    /// Forget a heuristically completed branch.
    async fn forget(&self, xid: &Xid) -> Result<(), XaError>;

    /// Ask the branch to prepare.
    async fn prepare(&self, xid: &Xid) -> Result<Vote, XaError>;

    /// Branches that are prepared or heuristically completed.
    async fn recover(&self, scan: RecoverScan) -> Result<Vec<Xid>, XaError>;

    /// Roll back a branch.
    async fn rollback(&self, xid: &Xid) -> Result<(), XaError>;
}

/// Terminator for runtimes without a transaction manager.
///
/// No branch is ever known, so completion calls fail with
/// [`XaError::UnknownXid`] and recovery finds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInflowXaTerminator;

#[async_trait]
impl XaTerminator for NoInflowXaTerminator {
    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError> {
        debug!("Commit of {} (one_phase: {}) refused", xid, one_phase);
        Err(XaError::UnknownXid(xid.clone()))
    }

    async fn forget(&self, xid: &Xid) -> Result<(), XaError> {
        Err(XaError::UnknownXid(xid.clone()))
    }

    async fn prepare(&self, xid: &Xid) -> Result<Vote, XaError> {
        debug!("Prepare of {} refused", xid);
        Err(XaError::UnknownXid(xid.clone()))
    }

    async fn recover(&self, _scan: RecoverScan) -> Result<Vec<Xid>, XaError> {
        Ok(Vec::new())
    }

    async fn rollback(&self, xid: &Xid) -> Result<(), XaError> {
        Err(XaError::UnknownXid(xid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xid() -> Xid {
        Xid::new(1, b"gtrid".to_vec(), b"b1".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_no_inflow_knows_no_branch() {
        let xa = NoInflowXaTerminator;

        let err = xa.prepare(&xid()).await.unwrap_err();
        assert_eq!(err.code(), codes::XAER_NOTA);
        assert!(xa.commit(&xid(), true).await.is_err());
        assert!(xa.rollback(&xid()).await.is_err());
        assert!(xa.forget(&xid()).await.is_err());
        assert!(xa.recover(RecoverScan::StartEnd).await.unwrap().is_empty());
    }

    #[test]
    fn test_recover_flags() {
        for scan in [
            RecoverScan::Start,
            RecoverScan::Continue,
            RecoverScan::End,
            RecoverScan::StartEnd,
        ] {
            assert_eq!(RecoverScan::from_flags(scan.flags()).unwrap(), scan);
        }
        assert_eq!(
            RecoverScan::from_flags(0x10).unwrap_err().code(),
            codes::XAER_INVAL
        );
    }

    #[test]
    fn test_vote_codes() {
        assert_eq!(Vote::Ok.code(), 0);
        assert_eq!(Vote::ReadOnly.code(), 3);
    }
}
