//! Name -> tunnel handle registry
//!
//! A handle is created the first time a name is connected or queried and then
//! reused for the life of the process, so every operation on a name reaches
//! the same backend object.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

/// Opaque backend-facing identity for a named tunnel
#[derive(Debug, PartialEq, Eq)]
pub struct TunnelHandle {
    name: String,
    id: Uuid,
}

impl TunnelHandle {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: Uuid::new_v4(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Registry of live tunnel handles
pub struct TunnelRegistry {
    tunnels: DashMap<String, Arc<TunnelHandle>>,
}

impl TunnelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tunnels: DashMap::new(),
        })
    }

    /// Get the handle for `name`, creating it on first use
    ///
    /// Concurrent callers racing on the same new name all receive the same
    /// handle.
    pub fn resolve(&self, name: &str) -> Arc<TunnelHandle> {
        if let Some(handle) = self.tunnels.get(name) {
            return handle.value().clone();
        }

        self.tunnels
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Created tunnel handle for {}", name);
                Arc::new(TunnelHandle::new(name))
            })
            .value()
            .clone()
    }

    /// Cached handle for `name`, without creating one
    pub fn get(&self, name: &str) -> Option<Arc<TunnelHandle>> {
        self.tunnels.get(name).map(|h| h.value().clone())
    }

    /// A handle that is never cached
    ///
    /// Used to tear down an interface this process did not bring up.
    pub fn temporary(name: &str) -> Arc<TunnelHandle> {
        Arc::new(TunnelHandle::new(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tunnels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Names with a cached handle, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tunnels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self {
            tunnels: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reuses_handle() {
        let registry = TunnelRegistry::new();

        let first = registry.resolve("wg0");
        let second = registry.resolve("wg0");
        let other = registry.resolve("wg1");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.names(), vec!["wg0".to_string(), "wg1".to_string()]);
    }

    #[test]
    fn test_concurrent_resolve_yields_one_handle() {
        let registry = TunnelRegistry::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.resolve("race"))
            })
            .map(|t| t.join().unwrap())
            .collect();

        assert_eq!(registry.len(), 1);
        for handle in &handles {
            assert!(Arc::ptr_eq(handle, &handles[0]));
        }
    }

    #[test]
    fn test_temporary_is_not_cached() {
        let registry = TunnelRegistry::new();
        let temp = TunnelRegistry::temporary("foo");

        assert_eq!(temp.name(), "foo");
        assert!(registry.get("foo").is_none());
        assert!(registry.is_empty());
    }
}
