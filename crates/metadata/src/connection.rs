//! Managed connection metadata.

use crate::error::ResourceError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Describes the backend behind a managed connection.
pub trait ManagedConnectionMetaData: Send + Sync {
    /// Backend product name.
    fn eis_product_name(&self) -> Result<String, ResourceError>;

    /// Backend product version.
    fn eis_product_version(&self) -> Result<String, ResourceError>;

    /// Max concurrent connections the backend allows. Zero means no limit
    /// or unknown.
    fn max_connections(&self) -> Result<u32, ResourceError>;

    /// User name of the connection.
    fn user_name(&self) -> Result<String, ResourceError>;
}

/// Metadata captured when a connection was opened.
///
/// Queries fail with [`ResourceError::Detached`] once the connection is
/// closed.
#[derive(Debug, Serialize, Deserialize)]
pub struct StaticConnectionMetaData {
    /// Backend product name
    pub product_name: String,
    /// Backend product version
    pub product_version: String,
    /// Connection limit, zero for no limit or unknown
    #[serde(default)]
    pub max_connections: u32,
    /// User name, if the backend reports one
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(skip)]
    detached: AtomicBool,
}

impl StaticConnectionMetaData {
    /// Create attached metadata.
    pub fn new(product_name: impl Into<String>, product_version: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            product_version: product_version.into(),
            max_connections: 0,
            user_name: None,
            detached: AtomicBool::new(false),
        }
    }

    /// Set the connection limit.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the user name.
    pub fn with_user_name(mut self, user: impl Into<String>) -> Self {
        self.user_name = Some(user.into());
        self
    }

    /// Mark the underlying connection closed.
    pub fn detach(&self) {
        if !self.detached.swap(true, Ordering::AcqRel) {
            debug!("Metadata for {} detached", self.product_name);
        }
    }

    fn attached(&self) -> Result<(), ResourceError> {
        if self.detached.load(Ordering::Acquire) {
            return Err(ResourceError::Detached);
        }
        Ok(())
    }
}

impl ManagedConnectionMetaData for StaticConnectionMetaData {
    fn eis_product_name(&self) -> Result<String, ResourceError> {
        self.attached()?;
        Ok(self.product_name.clone())
    }

    fn eis_product_version(&self) -> Result<String, ResourceError> {
        self.attached()?;
        Ok(self.product_version.clone())
    }

    fn max_connections(&self) -> Result<u32, ResourceError> {
        self.attached()?;
        Ok(self.max_connections)
    }

    fn user_name(&self) -> Result<String, ResourceError> {
        self.attached()?;
        self.user_name
            .clone()
            .ok_or_else(|| ResourceError::Unavailable("user name not reported".into()))
    }
}
