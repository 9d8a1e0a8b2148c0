//! Result set capabilities of a backend.

use crate::error::ResourceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Scrolling behavior of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetType {
    /// Cursor moves forward only
    ForwardOnly,
    /// Scrollable, not sensitive to other changes
    ScrollInsensitive,
    /// Scrollable and sensitive to other changes
    ScrollSensitive,
}

impl ResultSetType {
    /// JDBC type code.
    pub fn code(self) -> i32 {
        match self {
            ResultSetType::ForwardOnly => 1003,
            ResultSetType::ScrollInsensitive => 1004,
            ResultSetType::ScrollSensitive => 1005,
        }
    }
}

impl TryFrom<i32> for ResultSetType {
    type Error = ResourceError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1003 => Ok(ResultSetType::ForwardOnly),
            1004 => Ok(ResultSetType::ScrollInsensitive),
            1005 => Ok(ResultSetType::ScrollSensitive),
            code => Err(ResourceError::UnknownCode {
                kind: "result set type",
                code,
            }),
        }
    }
}

/// Whether a result set can be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// Read only
    ReadOnly,
    /// Updatable
    Updatable,
}

impl Concurrency {
    /// JDBC concurrency code.
    pub fn code(self) -> i32 {
        match self {
            Concurrency::ReadOnly => 1007,
            Concurrency::Updatable => 1008,
        }
    }
}

impl TryFrom<i32> for Concurrency {
    type Error = ResourceError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1007 => Ok(Concurrency::ReadOnly),
            1008 => Ok(Concurrency::Updatable),
            code => Err(ResourceError::UnknownCode {
                kind: "concurrency",
                code,
            }),
        }
    }
}

/// Answers what a backend's result sets support.
pub trait ResultSetInfo: Send + Sync {
    /// Whether a visible row update is detected.
    fn updates_are_detected(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether a visible row insert is detected.
    fn inserts_are_detected(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether a deleted row is detected.
    fn deletes_are_detected(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether the type is supported at all.
    fn supports_result_set_type(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether the type is supported with the given concurrency.
    fn supports_result_type_concurrency(
        &self,
        ty: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<bool, ResourceError>;

    /// Whether updates made by others are visible.
    fn others_updates_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether deletes made by others are visible.
    fn others_deletes_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether inserts made by others are visible.
    fn others_inserts_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether the result set's own updates are visible.
    fn own_updates_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether the result set's own inserts are visible.
    fn own_inserts_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError>;

    /// Whether the result set's own deletes are visible.
    fn own_deletes_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError>;
}

/// Capabilities of one result set type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Visibility {
    /// Concurrency modes available for this type
    pub concurrency: Vec<Concurrency>,
    /// Row updates are detected
    pub updates_detected: bool,
    /// Row inserts are detected
    pub inserts_detected: bool,
    /// Row deletes are detected
    pub deletes_detected: bool,
    /// Updates by others are visible
    pub others_updates_visible: bool,
    /// Deletes by others are visible
    pub others_deletes_visible: bool,
    /// Inserts by others are visible
    pub others_inserts_visible: bool,
    /// Own updates are visible
    pub own_updates_visible: bool,
    /// Own inserts are visible
    pub own_inserts_visible: bool,
    /// Own deletes are visible
    pub own_deletes_visible: bool,
}

/// Result set capabilities captured from a backend. Types missing from
/// the table are unsupported and answer `false` everywhere.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StaticResultSetInfo {
    /// Capabilities per supported type
    #[serde(default)]
    pub types: BTreeMap<ResultSetType, Visibility>,
    #[serde(skip)]
    detached: AtomicBool,
}

impl StaticResultSetInfo {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend offering only forward-only, read-only cursors.
    pub fn forward_only() -> Self {
        Self::new().with_type(
            ResultSetType::ForwardOnly,
            Visibility {
                concurrency: vec![Concurrency::ReadOnly],
                ..Visibility::default()
            },
        )
    }

    /// Add or replace a supported type.
    pub fn with_type(mut self, ty: ResultSetType, visibility: Visibility) -> Self {
        self.types.insert(ty, visibility);
        self
    }

    /// Mark the underlying connection closed.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    fn lookup<T>(
        &self,
        ty: ResultSetType,
        f: impl FnOnce(&Visibility) -> T,
        missing: T,
    ) -> Result<T, ResourceError> {
        if self.detached.load(Ordering::Acquire) {
            return Err(ResourceError::Detached);
        }
        Ok(self.types.get(&ty).map(f).unwrap_or(missing))
    }
}

impl ResultSetInfo for StaticResultSetInfo {
    fn updates_are_detected(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.updates_detected, false)
    }

    fn inserts_are_detected(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.inserts_detected, false)
    }

    fn deletes_are_detected(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.deletes_detected, false)
    }

    fn supports_result_set_type(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |_| true, false)
    }

    fn supports_result_type_concurrency(
        &self,
        ty: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.concurrency.contains(&concurrency), false)
    }

    fn others_updates_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.others_updates_visible, false)
    }

    fn others_deletes_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.others_deletes_visible, false)
    }

    fn others_inserts_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.others_inserts_visible, false)
    }

    fn own_updates_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.own_updates_visible, false)
    }

    fn own_inserts_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.own_inserts_visible, false)
    }

    fn own_deletes_are_visible(&self, ty: ResultSetType) -> Result<bool, ResourceError> {
        self.lookup(ty, |v| v.own_deletes_visible, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ResultSetType::try_from(1004).unwrap(), ResultSetType::ScrollInsensitive);
        assert_eq!(Concurrency::try_from(1008).unwrap(), Concurrency::Updatable);
        assert_eq!(ResultSetType::ScrollSensitive.code(), 1005);
        assert_eq!(
            ResultSetType::try_from(42),
            Err(ResourceError::UnknownCode {
                kind: "result set type",
                code: 42
            })
        );
        assert!(Concurrency::try_from(1003).is_err());
    }

    #[test]
    fn test_forward_only_backend() {
        let info = StaticResultSetInfo::forward_only();

        assert!(info.supports_result_set_type(ResultSetType::ForwardOnly).unwrap());
        assert!(!info.supports_result_set_type(ResultSetType::ScrollSensitive).unwrap());
        assert!(info
            .supports_result_type_concurrency(ResultSetType::ForwardOnly, Concurrency::ReadOnly)
            .unwrap());
        assert!(!info
            .supports_result_type_concurrency(ResultSetType::ForwardOnly, Concurrency::Updatable)
            .unwrap());
        assert!(!info.own_updates_are_visible(ResultSetType::ForwardOnly).unwrap());
    }

    #[test]
    fn test_loads_from_json() {
        let info: StaticResultSetInfo = serde_json::from_str(
            r#"{"types": {"scroll_sensitive": {"concurrency": ["updatable"], "own_updates_visible": true, "others_deletes_visible": true}}}"#,
        )
        .unwrap();

        let ty = ResultSetType::ScrollSensitive;
        assert!(info.own_updates_are_visible(ty).unwrap());
        assert!(info.others_deletes_are_visible(ty).unwrap());
        assert!(!info.others_inserts_are_visible(ty).unwrap());
        assert!(info
            .supports_result_type_concurrency(ty, Concurrency::Updatable)
            .unwrap());
    }

    #[test]
    fn test_detached_fails_every_query() {
        let info = StaticResultSetInfo::forward_only();
        info.detach();
        let ty = ResultSetType::ForwardOnly;

        assert_eq!(info.supports_result_set_type(ty), Err(ResourceError::Detached));
        assert_eq!(info.updates_are_detected(ty), Err(ResourceError::Detached));
        assert_eq!(info.own_deletes_are_visible(ty), Err(ResourceError::Detached));
        assert_eq!(
            info.supports_result_type_concurrency(ty, Concurrency::ReadOnly),
            Err(ResourceError::Detached)
        );
    }
}
