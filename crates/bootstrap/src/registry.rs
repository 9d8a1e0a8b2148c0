//! Context capability registry.

use connector_core::ContextKind;
use std::collections::HashMap;

/// Answers which context kinds a runtime propagates to work.
///
/// Populated once at construction and never mutated, so every query for a
/// given kind returns the same answer for the registry's lifetime.
#[derive(Debug, Clone)]
pub struct ContextRegistry {
    support: HashMap<ContextKind, bool>,
}

impl ContextRegistry {
    /// Build from the kinds the runtime supports. Standard kinds that are not
    /// listed are recorded as unsupported.
    pub fn new(supported: impl IntoIterator<Item = ContextKind>) -> Self {
        let mut support: HashMap<ContextKind, bool> = [
            ContextKind::Transaction,
            ContextKind::Security,
            ContextKind::Hint,
        ]
        .into_iter()
        .map(|kind| (kind, false))
        .collect();

        for kind in supported {
            support.insert(kind, true);
        }

        Self { support }
    }

    /// Whether `kind` is supported. Unknown kinds are unsupported.
    pub fn is_supported(&self, kind: &ContextKind) -> bool {
        self.support.get(kind).copied().unwrap_or(false)
    }

    /// Supported kinds, sorted.
    pub fn supported(&self) -> Vec<ContextKind> {
        let mut kinds: Vec<_> = self
            .support
            .iter()
            .filter(|(_, supported)| **supported)
            .map(|(kind, _)| kind.clone())
            .collect();
        kinds.sort();
        kinds
    }
}
