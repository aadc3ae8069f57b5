//! Current-state metadata, collected fresh for every decision.

use crate::error::StoreResult;
use crate::graph::{NodeKind, PlanGraph};
use crate::hash::HashAlgorithm;
use crate::imports::ImportRegistry;
use crate::plan::{Plan, file_path, standardize_command};
use crate::store::{FingerprintStore, Namespace, Progress, RecordsExt};
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// Fingerprints recorded by the last successful build of a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredMeta {
    /// Standardized command text
    pub command: Option<String>,
    /// Aggregate dependency fingerprint
    pub depends: Option<String>,
    /// Value fingerprint; the content hash for file targets
    pub kernel: Option<String>,
}

/// State of a file target's output on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    /// Content hash
    Hash(String),
    /// The file does not exist
    Absent,
    /// The file exists but hashing failed
    Unreadable(String),
}

/// Snapshot of a node's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Node name
    pub name: String,
    /// Effective trigger policy
    pub trigger: Trigger,
    /// Whether the node is an import rather than a target
    pub imported: bool,
    /// Whether the node has no committed value
    pub missing: bool,
    /// Standardized command text
    pub command: String,
    /// Aggregate fingerprint of the node's dependencies
    pub depends_hash: String,
    /// Output file state, for file targets whose policy checks files
    pub file: Option<FileState>,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// Current fingerprints of every import and file import in the graph.
///
/// Unreadable file imports get the fingerprint of empty content and a
/// warning; they are still resolvable, and recover as soon as they can be
/// read again.
#[must_use]
pub fn import_fingerprints(
    graph: &PlanGraph,
    imports: &ImportRegistry,
    algorithm: HashAlgorithm,
    root: &Path,
) -> HashMap<String, String> {
    graph
        .topological_order()
        .filter_map(|node| match node.kind {
            NodeKind::Target => None,
            NodeKind::Import => imports
                .get(&node.name)
                .map(|import| (node.name.clone(), import.fingerprint(algorithm))),
            NodeKind::FileImport => {
                let fingerprint = file_path(&node.name, root)
                    .map(|path| algorithm.hash_file(&path))
                    .transpose()
                    .unwrap_or_else(|e| {
                        warn!(file = %node.name, error = %e, "Failed to hash file import");
                        None
                    })
                    .unwrap_or_else(|| algorithm.hash_bytes(b""));
                Some((node.name.clone(), fingerprint))
            }
        })
        .collect()
}

/// Read-only view used to collect [`Metadata`].
pub struct MetaContext<'a> {
    /// The plan
    pub plan: &'a Plan,
    /// Its graph
    pub graph: &'a PlanGraph,
    /// Fingerprint store
    pub store: &'a dyn FingerprintStore,
    /// Output of [`import_fingerprints`] for this run
    pub imports: &'a HashMap<String, String>,
    /// Digest in use
    pub algorithm: HashAlgorithm,
    /// Directory file targets are resolved against
    pub root: &'a Path,
}

impl MetaContext<'_> {
    /// Current fingerprint of a dependency.
    ///
    /// Imports use their live fingerprint; targets use the kernel of their
    /// last successful build, or the empty string if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn dependency_fingerprint(&self, name: &str) -> StoreResult<String> {
        if let Some(fingerprint) = self.imports.get(name) {
            return Ok(fingerprint.clone());
        }
        Ok(self.store.get(Namespace::Kernels, name)?.unwrap_or_default())
    }

    /// Aggregate fingerprint over a node's direct dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn depends_hash(&self, name: &str) -> StoreResult<String> {
        let deps = self.graph.dependencies(name);
        let mut entries = Vec::with_capacity(deps.len());
        for dep in &deps {
            entries.push((dep.as_str(), self.dependency_fingerprint(dep)?));
        }
        Ok(self
            .algorithm
            .hash_depends(entries.iter().map(|(n, f)| (*n, f.as_str()))))
    }

    /// Snapshot of a node's current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn collect(&self, name: &str) -> StoreResult<Metadata> {
        let depends_hash = self.depends_hash(name)?;

        let Some(target) = self.plan.get(name) else {
            return Ok(Metadata {
                name: name.to_string(),
                trigger: Trigger::Always,
                imported: true,
                missing: false,
                command: String::new(),
                depends_hash,
                file: None,
                timestamp: Utc::now(),
            });
        };

        let trigger = self.plan.effective_trigger(target);
        let missing = self.store.progress(name)? != Some(Progress::Done)
            || !self.store.exists(Namespace::Kernels, name)?
            || !self.store.exists(Namespace::Objects, name)?;

        let file = if trigger.checks_file() {
            target
                .file_path(self.root)
                .map(|path| file_state(self.algorithm, &path))
        } else {
            None
        };

        Ok(Metadata {
            name: name.to_string(),
            trigger,
            imported: false,
            missing,
            command: standardize_command(&target.command),
            depends_hash,
            file,
            timestamp: Utc::now(),
        })
    }
}

/// Hash a file target's output.
#[must_use]
pub fn file_state(algorithm: HashAlgorithm, path: &Path) -> FileState {
    match algorithm.hash_file(path) {
        Ok(hash) => FileState::Hash(hash),
        Err(e) if e.kind() == ErrorKind::NotFound => FileState::Absent,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to hash file target");
            FileState::Unreadable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SymbolAnalyzer;
    use crate::plan::Target;
    use crate::store::{BuildRecord, Commit, MemoryStore};
    use serde_json::json;
    use tempfile::TempDir;

    fn commit(store: &MemoryStore, name: &str, kernel: &str) {
        let record = BuildRecord {
            built_at: Utc::now(),
            duration_ms: 0,
            attempts: 1,
        };
        store
            .commit(
                name,
                &Commit {
                    value: &json!(1),
                    kernel,
                    depends: "d",
                    command: "c",
                    record: &record,
                },
            )
            .unwrap();
    }

    #[test]
    fn test_missing_until_committed() {
        let tmp = TempDir::new().unwrap();
        let plan = Plan::new(
            vec![Target::new("a", "1"), Target::new("b", "a + 1")],
            Trigger::Any,
        )
        .unwrap();
        let imports = ImportRegistry::new();
        let graph = PlanGraph::build(&plan, &imports, &SymbolAnalyzer::new(), tmp.path()).unwrap();
        let store = MemoryStore::new();
        let fingerprints = import_fingerprints(&graph, &imports, HashAlgorithm::Sha256, tmp.path());
        let ctx = MetaContext {
            plan: &plan,
            graph: &graph,
            store: &store,
            imports: &fingerprints,
            algorithm: HashAlgorithm::Sha256,
            root: tmp.path(),
        };

        assert!(ctx.collect("a").unwrap().missing);
        let before = ctx.collect("b").unwrap().depends_hash;

        commit(&store, "a", "k1");
        assert!(!ctx.collect("a").unwrap().missing);

        // b's dependency fingerprint follows a's kernel
        let after = ctx.collect("b").unwrap().depends_hash;
        assert_ne!(before, after);

        store.set_progress("a", Progress::Running).unwrap();
        assert!(ctx.collect("a").unwrap().missing);
    }

    #[test]
    fn test_file_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.txt");
        assert_eq!(file_state(HashAlgorithm::Sha256, &path), FileState::Absent);

        std::fs::write(&path, "x").unwrap();
        assert_eq!(
            file_state(HashAlgorithm::Sha256, &path),
            FileState::Hash(HashAlgorithm::Sha256.hash_str("x"))
        );
    }

    #[test]
    fn test_import_fingerprints() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("raw.csv"), "a,b\n1,2\n").unwrap();

        let mut imports = ImportRegistry::new();
        imports.insert_value("threshold", json!(5));
        let plan = Plan::new(
            vec![Target::new("t", r#"filter(read("raw.csv"), threshold)"#)],
            Trigger::Any,
        )
        .unwrap();
        let graph = PlanGraph::build(&plan, &imports, &SymbolAnalyzer::new(), tmp.path()).unwrap();

        let fingerprints = import_fingerprints(&graph, &imports, HashAlgorithm::Sha256, tmp.path());
        assert_eq!(
            fingerprints.get("\"raw.csv\""),
            Some(&HashAlgorithm::Sha256.hash_str("a,b\n1,2\n"))
        );
        assert!(fingerprints.contains_key("threshold"));
        assert!(!fingerprints.contains_key("t"));
    }
}
