//! Names of lock records known to exist.
//!
//! Backends acquiring with insert-then-update pay for a rejected insert on
//! every attempt once the record exists. Remembering which names have been
//! seen lets the provider go straight to the conditional update.

use dashmap::DashSet;

/// Process-local set of lock names whose record exists in the store.
#[derive(Debug, Default)]
pub struct LockRecordRegistry {
    names: DashSet<String>,
}

impl LockRecordRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that the record for `name` exists.
    pub fn add(&self, name: &str) {
        self.names.insert(name.to_string());
    }

    /// Forget `name`, so the next attempt tries an insert again.
    pub fn remove(&self, name: &str) {
        self.names.remove(name);
    }

    /// Whether the record for `name` is known to exist.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Forget every name.
    pub fn clear(&self) {
        self.names.clear();
    }

    /// Number of remembered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no name is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
