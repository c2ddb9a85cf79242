//! Shared module namespace
//!
//! Loaded plugin code publishes its export under a well-known key (the
//! manifest's `globalVar`); the host retrieves it from here. This is an
//! explicit registry owned by the loader rather than ambient process-global
//! state, so tests can construct and reset one per case. At most one live
//! value exists per key; rebinding a key requires eviction first.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

/// Registry mapping namespace keys to loaded-module handles.
#[derive(Debug, Default)]
pub struct ModuleNamespace {
    entries: RwLock<HashMap<String, Value>>,
}

impl ModuleNamespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a module export under a key, replacing any previous value.
    pub fn publish(&self, key: &str, value: Value) {
        self.entries
            .write()
            .expect("namespace lock poisoned")
            .insert(key.to_string(), value);
    }

    /// Look up the value registered under a key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .expect("namespace lock poisoned")
            .get(key)
            .cloned()
    }

    /// Whether a key currently holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .expect("namespace lock poisoned")
            .contains_key(key)
    }

    /// Remove the value registered under a key. Returns whether one existed.
    pub fn evict(&self, key: &str) -> bool {
        self.entries
            .write()
            .expect("namespace lock poisoned")
            .remove(key)
            .is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("namespace lock poisoned").len()
    }

    /// Whether the namespace holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Intended for host shutdown and test teardown.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("namespace lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_and_get() {
        let ns = ModuleNamespace::new();
        ns.publish("ExampleTool", json!({"ready": true}));

        assert!(ns.contains("ExampleTool"));
        assert_eq!(ns.get("ExampleTool").unwrap()["ready"], json!(true));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_get_missing_key() {
        let ns = ModuleNamespace::new();
        assert!(ns.get("Nope").is_none());
        assert!(!ns.contains("Nope"));
    }

    #[test]
    fn test_publish_replaces_previous_value() {
        let ns = ModuleNamespace::new();
        ns.publish("Key", json!(1));
        ns.publish("Key", json!(2));
        assert_eq!(ns.get("Key").unwrap(), json!(2));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_evict() {
        let ns = ModuleNamespace::new();
        ns.publish("Key", json!(1));
        assert!(ns.evict("Key"));
        assert!(!ns.evict("Key"));
        assert!(ns.is_empty());
    }

    #[test]
    fn test_clear() {
        let ns = ModuleNamespace::new();
        ns.publish("A", json!(1));
        ns.publish("B", json!(2));
        ns.clear();
        assert!(ns.is_empty());
    }
}
