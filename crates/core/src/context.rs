//! Execution context carried by submitted work.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Maximum size in bytes of a global transaction id.
pub const MAX_GTRID_SIZE: usize = 64;

/// Maximum size in bytes of a branch qualifier.
pub const MAX_BQUAL_SIZE: usize = 64;

/// Format id reserved for the null Xid.
pub const NULL_FORMAT_ID: i32 = -1;

/// Errors building an [`Xid`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XidError {
    /// Format id -1 is reserved for the null Xid
    #[error("format id {NULL_FORMAT_ID} denotes the null xid")]
    NullFormat,

    /// Global transaction id is empty
    #[error("global transaction id must not be empty")]
    EmptyGlobalId,

    /// Global transaction id exceeds the XA limit
    #[error("global transaction id is {0} bytes, limit is {MAX_GTRID_SIZE}")]
    GlobalIdTooLong(usize),

    /// Branch qualifier exceeds the XA limit
    #[error("branch qualifier is {0} bytes, limit is {MAX_BQUAL_SIZE}")]
    BranchTooLong(usize),
}

/// XA transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Create a validated Xid.
    pub fn new(
        format_id: i32,
        global_transaction_id: impl Into<Vec<u8>>,
        branch_qualifier: impl Into<Vec<u8>>,
    ) -> Result<Self, XidError> {
        let global_transaction_id = global_transaction_id.into();
        let branch_qualifier = branch_qualifier.into();

        if format_id == NULL_FORMAT_ID {
            return Err(XidError::NullFormat);
        }
        if global_transaction_id.is_empty() {
            return Err(XidError::EmptyGlobalId);
        }
        if global_transaction_id.len() > MAX_GTRID_SIZE {
            return Err(XidError::GlobalIdTooLong(global_transaction_id.len()));
        }
        if branch_qualifier.len() > MAX_BQUAL_SIZE {
            return Err(XidError::BranchTooLong(branch_qualifier.len()));
        }

        Ok(Self {
            format_id,
            global_transaction_id,
            branch_qualifier,
        })
    }

    /// Format identifier.
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Global transaction id bytes.
    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    /// Branch qualifier bytes.
    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for b in &self.global_transaction_id {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ":")?;
        for b in &self.branch_qualifier {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Capability tag for a kind of context a runtime may propagate to work.
///
/// A `Custom` kind whose name is a standard one (in any case) is the same
/// kind as the standard variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContextKind {
    /// Imported transaction
    Transaction,
    /// Security identity
    Security,
    /// Scheduling and naming hints
    Hint,
    /// Vendor-specific context
    Custom(String),
}

impl ContextKind {
    /// Stable string name.
    pub fn as_str(&self) -> &str {
        match self {
            ContextKind::Transaction => "transaction",
            ContextKind::Security => "security",
            ContextKind::Hint => "hint",
            ContextKind::Custom(name) => name,
        }
    }

    /// Standard variant for a reserved custom name.
    pub fn normalized(self) -> Self {
        match self {
            ContextKind::Custom(name) => ContextKind::from(name),
            kind => kind,
        }
    }

    fn key(&self) -> (u8, &str) {
        match self {
            ContextKind::Transaction => (0, ""),
            ContextKind::Security => (1, ""),
            ContextKind::Hint => (2, ""),
            ContextKind::Custom(name) => match standard_rank(name) {
                Some(rank) => (rank, ""),
                None => (3, name.trim()),
            },
        }
    }
}

fn standard_rank(name: &str) -> Option<u8> {
    let name = name.trim();
    ["transaction", "security", "hint"]
        .iter()
        .position(|standard| name.eq_ignore_ascii_case(standard))
        .and_then(|rank| u8::try_from(rank).ok())
}

impl PartialEq for ContextKind {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ContextKind {}

impl std::hash::Hash for ContextKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for ContextKind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContextKind {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContextKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "transaction" => ContextKind::Transaction,
            "security" => ContextKind::Security,
            "hint" => ContextKind::Hint,
            _ => ContextKind::Custom(s.trim().to_string()),
        })
    }
}

impl From<String> for ContextKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<ContextKind> for String {
    fn from(kind: ContextKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Immutable context a work item is executed under.
///
/// Attached at submission and consumed once by the executing pool, which
/// applies the transaction and timeout before the work runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    xid: Option<Xid>,
    transaction_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    hints: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate an imported transaction.
    pub fn with_xid(mut self, xid: Xid) -> Self {
        self.xid = Some(xid);
        self
    }

    /// Set the transaction timeout.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    /// Add a hint (e.g. a display name for the work).
    pub fn with_hint(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(name.into(), value.into());
        self
    }

    /// Imported transaction, if any.
    pub fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    /// Transaction timeout, if any.
    pub fn transaction_timeout(&self) -> Option<Duration> {
        self.transaction_timeout
    }

    /// Hint value by name.
    pub fn hint(&self, name: &str) -> Option<&str> {
        self.hints.get(name).map(String::as_str)
    }

    /// Context kinds the runtime must support to run work under this context.
    pub fn required_kinds(&self) -> Vec<ContextKind> {
        let mut kinds = Vec::new();
        if self.xid.is_some() || self.transaction_timeout.is_some() {
            kinds.push(ContextKind::Transaction);
        }
        if !self.hints.is_empty() {
            kinds.push(ContextKind::Hint);
        }
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xid() -> Xid {
        Xid::new(0x1234, b"gtrid-1".to_vec(), b"b1".to_vec()).unwrap()
    }

    #[test]
    fn test_xid_validation() {
        assert_eq!(Xid::new(NULL_FORMAT_ID, b"g".to_vec(), Vec::new()), Err(XidError::NullFormat));
        assert_eq!(Xid::new(1, Vec::new(), Vec::new()), Err(XidError::EmptyGlobalId));
        assert_eq!(
            Xid::new(1, vec![0u8; 65], Vec::new()),
            Err(XidError::GlobalIdTooLong(65))
        );
        assert_eq!(
            Xid::new(1, vec![1u8], vec![0u8; 70]),
            Err(XidError::BranchTooLong(70))
        );
        assert!(Xid::new(1, vec![0u8; 64], vec![0u8; 64]).is_ok());
    }

    #[test]
    fn test_xid_display_is_hex() {
        let xid = Xid::new(7, vec![0xab, 0x01], vec![0xff]).unwrap();
        assert_eq!(xid.to_string(), "7:ab01:ff");
    }

    #[test]
    fn test_context_kind_parse() {
        assert_eq!("Transaction".parse::<ContextKind>().unwrap(), ContextKind::Transaction);
        assert_eq!("hint".parse::<ContextKind>().unwrap(), ContextKind::Hint);
        assert_eq!(
            "acme.trace".parse::<ContextKind>().unwrap(),
            ContextKind::Custom("acme.trace".to_string())
        );
    }

    #[test]
    fn test_context_kind_serializes_as_name() {
        let kinds = vec![ContextKind::Transaction, ContextKind::Custom("acme.trace".into())];
        let json = serde_json::to_string(&kinds).unwrap();
        assert_eq!(json, r#"["transaction","acme.trace"]"#);
        let back: Vec<ContextKind> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kinds);
    }

    #[test]
    fn test_reserved_custom_name_is_the_standard_kind() {
        let custom = ContextKind::Custom("Hint".into());
        assert_eq!(custom, ContextKind::Hint);
        assert_eq!(custom.clone().normalized(), ContextKind::Hint);
        assert_ne!(ContextKind::Custom("hints".into()), ContextKind::Hint);

        let set: std::collections::HashSet<_> = [ContextKind::Hint].into_iter().collect();
        assert!(set.contains(&custom));

        let json = serde_json::to_string(&custom).unwrap();
        let back: ContextKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, custom);
        assert!(matches!(back, ContextKind::Hint));
    }

    #[test]
    fn test_required_kinds() {
        assert!(ExecutionContext::new().required_kinds().is_empty());

        let ctx = ExecutionContext::new()
            .with_xid(xid())
            .with_hint("name", "poller");
        assert_eq!(
            ctx.required_kinds(),
            vec![ContextKind::Transaction, ContextKind::Hint]
        );
        assert_eq!(ctx.hint("name"), Some("poller"));
    }

    #[test]
    fn test_context_serde() {
        let ctx = ExecutionContext::new()
            .with_xid(xid())
            .with_transaction_timeout(Duration::from_secs(30));
        let json = serde_json::to_string(&ctx).unwrap();
        let back: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }
}
