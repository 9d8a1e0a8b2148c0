//! Unique identifiers for runtime entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a submitted work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(Ulid);

impl WorkId {
    /// Generate a new WorkId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work_{}", self.0)
    }
}

impl std::str::FromStr for WorkId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("work_").unwrap_or(s);
        Ok(Self(raw.parse()?))
    }
}

/// Unique identifier for a timer handed out by a bootstrap context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(Ulid);

impl TimerId {
    /// Generate a new TimerId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_id_display_round_trip() {
        let id = WorkId::new();
        let text = id.to_string();
        assert!(text.starts_with("work_"));
        let parsed: WorkId = text.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_work_ids_are_unique() {
        assert_ne!(WorkId::new(), WorkId::new());
        assert_ne!(TimerId::new(), TimerId::new());
    }
}
