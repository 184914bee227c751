//! In-memory map of running query executions.
//!
//! Process-local and non-authoritative: a restart loses the map and the
//! query reconciler respawns work from status. Values are cancellation
//! handles keyed by the query's namespaced name.

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use keel_core::NamespacedName;

#[derive(Clone, Default)]
pub struct OperationMap {
    inner: Arc<DashMap<NamespacedName, CancellationToken>>,
}

impl OperationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation; an existing token for the key is cancelled
    /// and replaced.
    pub fn register(&self, key: NamespacedName) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    pub fn contains(&self, key: &NamespacedName) -> bool {
        self.inner.contains_key(key)
    }

    /// Cancel and clear; returns whether an operation was registered.
    pub fn cancel(&self, key: &NamespacedName) -> bool {
        match self.inner.remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear without cancelling (normal completion).
    pub fn remove(&self, key: &NamespacedName) {
        self.inner.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_fires_token() {
        let operations = OperationMap::new();
        let key = NamespacedName::new("default", "q");

        let token = operations.register(key.clone());
        assert!(operations.contains(&key));
        assert!(!token.is_cancelled());

        assert!(operations.cancel(&key));
        assert!(token.is_cancelled());
        assert!(!operations.contains(&key));
        assert!(!operations.cancel(&key));
    }

    #[test]
    fn test_reregistration_cancels_previous() {
        let operations = OperationMap::new();
        let key = NamespacedName::new("default", "q");

        let first = operations.register(key.clone());
        let second = operations.register(key);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
