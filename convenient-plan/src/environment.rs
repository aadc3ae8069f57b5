//! In-memory values shared by all workers of a run.
//!
//! Each key has a single writer per run (the worker building that target),
//! readers are the workers of later stages.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Loaded target and import values.
#[derive(Debug, Default)]
pub struct Environment {
    values: RwLock<HashMap<String, Arc<Value>>>,
}

impl Environment {
    /// Empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `name`, if loaded.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Value>> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Load or replace the value of `name`.
    pub fn insert(&self, name: impl Into<String>, value: Value) -> Arc<Value> {
        let value = Arc::new(value);
        let _ = self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::clone(&value));
        value
    }

    /// Unload `name`. Returns whether it was loaded.
    pub fn remove(&self, name: &str) -> bool {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Whether `name` is loaded.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Loaded names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_get_remove() {
        let env = Environment::new();
        let stored = env.insert("x", json!([1, 2]));
        assert_eq!(env.get("x"), Some(stored));
        assert!(env.contains("x"));

        assert!(env.remove("x"));
        assert!(!env.remove("x"));
        assert_eq!(env.get("x"), None);
    }

    #[test]
    fn test_concurrent_writers_to_distinct_keys() {
        let env = Arc::new(Environment::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let env = Arc::clone(&env);
                std::thread::spawn(move || {
                    let _ = env.insert(format!("t{i}"), json!(i));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(env.names().len(), 8);
        assert_eq!(*env.get("t3").unwrap(), json!(3));
    }
}
