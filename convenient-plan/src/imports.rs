//! Imports: values the plan references but does not build.

use crate::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named value available to commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    /// Value handed to dependents
    pub value: Value,
    /// Source text (e.g. a function body). It is analysed for further
    /// references and is part of the fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Import {
    /// Fingerprint over value and source.
    #[must_use]
    pub fn fingerprint(&self, algorithm: HashAlgorithm) -> String {
        let mut buf = self.value.to_string();
        buf.push('\n');
        if let Some(source) = &self.source {
            buf.push_str(source);
        }
        algorithm.hash_str(&buf)
    }
}

/// Registry of named imports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportRegistry {
    imports: BTreeMap<String, Import>,
}

impl ImportRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain value.
    pub fn insert_value(&mut self, name: impl Into<String>, value: Value) {
        let _ = self.imports.insert(name.into(), Import { value, source: None });
    }

    /// Register a value together with the source it was defined by.
    pub fn insert_with_source(
        &mut self,
        name: impl Into<String>,
        value: Value,
        source: impl Into<String>,
    ) {
        let _ = self.imports.insert(
            name.into(),
            Import {
                value,
                source: Some(source.into()),
            },
        );
    }

    /// Look up an import.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Import> {
        self.imports.get(name)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.imports.contains_key(name)
    }

    /// All imports, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Import)> {
        self.imports.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of imports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.imports.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_covers_value_and_source() {
        let algo = HashAlgorithm::Sha256;
        let plain = Import {
            value: json!(3),
            source: None,
        };
        let sourced = Import {
            value: json!(3),
            source: Some("function(x) x + 1".to_string()),
        };
        let edited = Import {
            value: json!(3),
            source: Some("function(x) x + 2".to_string()),
        };

        assert_ne!(plain.fingerprint(algo), sourced.fingerprint(algo));
        assert_ne!(sourced.fingerprint(algo), edited.fingerprint(algo));
        assert_eq!(sourced.fingerprint(algo), sourced.clone().fingerprint(algo));
    }

    #[test]
    fn test_registry_from_json() {
        let registry: ImportRegistry =
            serde_json::from_str(r#"{"rate": {"value": 0.5}, "f": {"value": null, "source": "rate * 2"}}"#)
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("rate").unwrap().value, json!(0.5));
        assert_eq!(registry.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec!["f", "rate"]);
    }
}
