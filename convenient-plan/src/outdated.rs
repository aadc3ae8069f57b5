//! Outdated-set resolution.
//!
//! A target is outdated when its own trigger fires, or when one of its
//! dependencies is outdated and its own policy checks dependencies.
//! Propagation is per node: a `file`-only target below a changed target
//! stays up to date.
//!
//! The result is a prediction. At build time the scheduler re-evaluates
//! each target against the fingerprints its upstream actually committed,
//! so a dependency that rebuilds to an identical value does not force its
//! dependents to rebuild.

use crate::error::StoreResult;
use crate::graph::NodeKind;
use crate::meta::MetaContext;
use crate::store::RecordsExt;
use crate::trigger::{BuildReason, evaluate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Why a target is in the outdated set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "detail")]
pub enum OutdatedReason {
    /// The target's own trigger fired
    Trigger(BuildReason),
    /// The named dependency is outdated and the policy checks dependencies
    Upstream(String),
}

impl fmt::Display for OutdatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutdatedReason::Trigger(reason) => write!(f, "{reason} trigger"),
            OutdatedReason::Upstream(dep) => write!(f, "upstream '{dep}' is outdated"),
        }
    }
}

/// Compute the outdated targets, optionally restricted to `scope`.
///
/// Imports are never reported: they carry no stored state, and changes to
/// them surface through their dependents' dependency fingerprints.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn resolve(
    ctx: &MetaContext<'_>,
    scope: Option<&BTreeSet<String>>,
) -> StoreResult<BTreeMap<String, OutdatedReason>> {
    let mut outdated = BTreeMap::new();

    for node in ctx.graph.topological_order() {
        if node.kind != NodeKind::Target || scope.is_some_and(|s| !s.contains(&node.name)) {
            continue;
        }

        let current = ctx.collect(&node.name)?;
        let stored = ctx.store.stored_meta(&node.name)?;

        let reason = if let Some(reason) = evaluate(&current, &stored) {
            Some(OutdatedReason::Trigger(reason))
        } else if current.trigger.checks_depends() {
            ctx.graph
                .dependencies(&node.name)
                .into_iter()
                .find(|dep| outdated.contains_key(dep))
                .map(OutdatedReason::Upstream)
        } else {
            None
        };

        if let Some(reason) = reason {
            debug!(target = %node.name, reason = %reason, "Target is outdated");
            let _ = outdated.insert(node.name.clone(), reason);
        }
    }

    Ok(outdated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SymbolAnalyzer;
    use crate::graph::PlanGraph;
    use crate::hash::HashAlgorithm;
    use crate::imports::ImportRegistry;
    use crate::plan::{Plan, Target, standardize_command};
    use crate::store::{BuildRecord, Commit, MemoryStore};
    use crate::trigger::Trigger;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;

    struct Fixture {
        plan: Plan,
        graph: PlanGraph,
        store: MemoryStore,
        fingerprints: HashMap<String, String>,
    }

    impl Fixture {
        fn new(targets: Vec<Target>) -> Self {
            let plan = Plan::new(targets, Trigger::Any).unwrap();
            let graph =
                PlanGraph::build(&plan, &ImportRegistry::new(), &SymbolAnalyzer::new(), Path::new("."))
                    .unwrap();
            Self {
                plan,
                graph,
                store: MemoryStore::new(),
                fingerprints: HashMap::new(),
            }
        }

        fn ctx(&self) -> MetaContext<'_> {
            MetaContext {
                plan: &self.plan,
                graph: &self.graph,
                store: &self.store,
                imports: &self.fingerprints,
                algorithm: HashAlgorithm::Sha256,
                root: Path::new("."),
            }
        }

        /// Commit every target in topological order as if freshly built.
        fn build_all(&self) {
            let names: Vec<String> = self.graph.topological_order().map(|n| n.name.clone()).collect();
            for name in names {
                let depends = self.ctx().depends_hash(&name).unwrap();
                let command = standardize_command(&self.plan.get(&name).unwrap().command);
                let record = BuildRecord {
                    built_at: Utc::now(),
                    duration_ms: 1,
                    attempts: 1,
                };
                self.store
                    .commit(
                        &name,
                        &Commit {
                            value: &json!(name),
                            kernel: &format!("kernel-{name}"),
                            depends: &depends,
                            command: &command,
                            record: &record,
                        },
                    )
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_everything_missing_initially() {
        let fx = Fixture::new(vec![Target::new("a", "1"), Target::new("b", "a")]);
        let outdated = resolve(&fx.ctx(), None).unwrap();
        assert_eq!(outdated["a"], OutdatedReason::Trigger(BuildReason::Missing));
        assert_eq!(outdated["b"], OutdatedReason::Trigger(BuildReason::Missing));
    }

    #[test]
    fn test_up_to_date_after_build() {
        let fx = Fixture::new(vec![Target::new("a", "1"), Target::new("b", "a")]);
        fx.build_all();
        assert!(resolve(&fx.ctx(), None).unwrap().is_empty());
    }

    #[test]
    fn test_propagation_respects_policy() {
        let mut fx = Fixture::new(vec![
            Target::new("a", "1"),
            Target::new("by_depends", "a").with_trigger(Trigger::Depends),
            Target::new("by_file", "a").with_trigger(Trigger::File),
            Target::new("by_command", "a").with_trigger(Trigger::Command),
        ]);
        fx.build_all();

        fx.plan = Plan::new(
            vec![
                Target::new("a", "2"),
                Target::new("by_depends", "a").with_trigger(Trigger::Depends),
                Target::new("by_file", "a").with_trigger(Trigger::File),
                Target::new("by_command", "a").with_trigger(Trigger::Command),
            ],
            Trigger::Any,
        )
        .unwrap();

        let outdated = resolve(&fx.ctx(), None).unwrap();
        assert_eq!(outdated["a"], OutdatedReason::Trigger(BuildReason::Command));
        assert_eq!(outdated["by_depends"], OutdatedReason::Upstream("a".to_string()));
        assert!(!outdated.contains_key("by_file"));
        assert!(!outdated.contains_key("by_command"));
    }

    #[test]
    fn test_scope() {
        let fx = Fixture::new(vec![Target::new("a", "1"), Target::new("b", "2")]);
        let scope: BTreeSet<String> = ["b".to_string()].into();
        let outdated = resolve(&fx.ctx(), Some(&scope)).unwrap();
        assert_eq!(outdated.keys().collect::<Vec<_>>(), vec!["b"]);
    }
}
