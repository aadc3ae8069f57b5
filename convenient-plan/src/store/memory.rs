//! In-memory store, used for tests and throwaway runs.

use super::{FingerprintStore, Namespace};
use crate::error::StoreResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Namespace, BTreeMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FingerprintStore for MemoryStore {
    fn get(&self, namespace: Namespace, key: &str) -> StoreResult<Option<String>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn set(&self, namespace: Namespace, key: &str, value: &str) -> StoreResult<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let _ = records
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: Namespace, key: &str) -> StoreResult<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ns) = records.get_mut(&namespace) {
            let _ = ns.remove(key);
        }
        Ok(())
    }

    fn keys(&self, namespace: Namespace) -> StoreResult<Vec<String>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .get(&namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_are_separate() {
        let store = MemoryStore::new();
        store.set(Namespace::Command, "a", "one").unwrap();
        store.set(Namespace::Depends, "a", "two").unwrap();

        assert_eq!(store.get(Namespace::Command, "a").unwrap().as_deref(), Some("one"));
        assert_eq!(store.get(Namespace::Depends, "a").unwrap().as_deref(), Some("two"));
        assert!(!store.exists(Namespace::Kernels, "a").unwrap());
    }

    #[test]
    fn test_keys_sorted_and_remove() {
        let store = MemoryStore::new();
        for key in ["c", "a", "b"] {
            store.set(Namespace::Objects, key, "1").unwrap();
        }
        assert_eq!(store.keys(Namespace::Objects).unwrap(), vec!["a", "b", "c"]);

        store.remove(Namespace::Objects, "b").unwrap();
        store.remove(Namespace::Objects, "missing").unwrap();
        assert_eq!(store.keys(Namespace::Objects).unwrap(), vec!["a", "c"]);
    }
}
