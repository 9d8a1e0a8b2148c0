//! Runtime configuration.

use connector_work::WorkManagerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON or invalid field values
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    /// Values that parse but do not make sense together
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a [`crate::RuntimeBootstrapContext`] is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Work manager settings
    pub work: WorkManagerConfig,
    /// Max live timers
    pub max_timers: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            work: WorkManagerConfig::default(),
            max_timers: 64,
        }
    }
}

impl BootstrapConfig {
    /// Parse from a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Pretty JSON rendering.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_timers == 0 {
            return Err(ConfigError::Invalid("max_timers must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for kind in &self.work.supported_contexts {
            if !seen.insert(kind) {
                return Err(ConfigError::Invalid(format!(
                    "context kind '{}' listed twice",
                    kind
                )));
            }
        }
        Ok(())
    }
}
